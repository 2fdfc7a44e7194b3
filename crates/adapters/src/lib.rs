mod base_url;
mod error;
mod llm;
mod retry;

pub use base_url::{gemini_base_url, openai_base_url};
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile, API_KEY_ENV_VARS};
pub use retry::{call_with_retry, RetryConfig};

pub use remix_core::config::{Config, ConfigStore, LlmConfig};
pub use remix_core::{GenerationOptions, LanguageModel, LanguageModelError};
