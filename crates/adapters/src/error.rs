use remix_core::LanguageModelError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("no API key configured; set one in the profile or via {}", .0.join(" / "))]
    MissingCredential(&'static [&'static str]),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Configuration problems fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::InvalidConfig(_) | AdapterError::MissingCredential(_) => false,
            AdapterError::RetryExhausted { source, .. } => source.is_retryable(),
            AdapterError::Http(_) | AdapterError::Json(_) | AdapterError::HttpStatus { .. } => {
                true
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AdapterError::InvalidConfig(_) | AdapterError::MissingCredential(_)
        )
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(error: AdapterError) -> Self {
        if error.is_configuration() {
            LanguageModelError::configuration(error.to_string())
        } else {
            LanguageModelError::backend(error)
        }
    }
}
