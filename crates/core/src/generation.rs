use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;

/// Per-call knobs forwarded to the text-generation backend.
///
/// `temperature: None` means "use the backend profile's default"; the style and
/// refinement pipelines rely on that, while blueprint and scene calls forward the
/// session entropy untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationOptions {
    pub schema: Option<Value>,
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn wants_json(&self) -> bool {
        self.schema.is_some()
    }
}

#[derive(Debug)]
pub enum LanguageModelError {
    /// The backend credential is absent. Retrying will not help.
    Configuration(String),
    /// Transport, provider or decoding failure for a single call.
    Backend(Box<dyn StdError + Send + Sync>),
}

impl LanguageModelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn backend<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }

    pub fn backend_message(message: impl Into<String>) -> Self {
        Self::Backend(message.into().into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "configuration error: {message}"),
            Self::Backend(inner) => write!(f, "backend error: {inner}"),
        }
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Configuration(_) => None,
            Self::Backend(inner) => Some(inner.as_ref()),
        }
    }
}

/// A single external text-generation call. Implementations make exactly one
/// attempt unless their own configuration says otherwise; callers never retry.
pub trait LanguageModel: Send + Sync {
    fn invoke(&self, prompt: &str, options: &GenerationOptions)
        -> Result<String, LanguageModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LanguageModelError> {
        (**self).invoke(prompt, options)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<M> {
    fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LanguageModelError> {
        (**self).invoke(prompt, options)
    }
}

/// How a pipeline failure should be treated by the workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Configuration,
    Backend,
    Validation,
}

impl From<&LanguageModelError> for FailureKind {
    fn from(error: &LanguageModelError) -> Self {
        match error {
            LanguageModelError::Configuration(_) => FailureKind::Configuration,
            LanguageModelError::Backend(_) => FailureKind::Backend,
        }
    }
}

/// Strips markdown code fences some backends wrap around JSON or prose.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
