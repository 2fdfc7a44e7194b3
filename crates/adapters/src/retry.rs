use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

/// `max_retries` counts total attempts; the default of one means a single
/// call with no retry.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub sleep: Duration,
}

impl RetryConfig {
    pub const fn new(max_retries: usize, sleep: Duration) -> Self {
        Self { max_retries, sleep }
    }

    pub const fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::single_attempt()
    }
}

pub fn call_with_retry<F, T>(mut f: F, config: &RetryConfig) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.attempts();
    let mut attempt = 1;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempts == 1 || !err.is_retryable() => return Err(err),
            Err(err) if attempt >= attempts => {
                warn!("[call_with_retry] giving up after {attempts} attempts: {err}");
                return Err(AdapterError::retry_exhausted(attempts, err));
            }
            Err(err) => {
                warn!("[call_with_retry] attempt {attempt}/{attempts} failed: {err}");
                thread::sleep(config.sleep);
                attempt += 1;
            }
        }
    }
}
