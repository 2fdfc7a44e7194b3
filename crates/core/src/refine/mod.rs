use crate::generation::{FailureKind, GenerationOptions, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::Character;
use crate::prompts::{build_refine_prompt, PromptError, PromptRegistry};
use thiserror::Error;

pub const REFINE_FAILURE_MESSAGE: &str = "AI精修失败，请重试。";

#[derive(Clone, Copy, Debug)]
pub struct RefineRequest<'r> {
    pub content: &'r str,
    pub instruction: &'r str,
    pub style_dna: &'r str,
    pub characters: &'r [Character],
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("failed to render refine prompt: {0}")]
    Prompt(#[source] PromptError),
    #[error("refinement call failed: {0}")]
    Model(#[source] LanguageModelError),
}

impl RefineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Prompt(_) => FailureKind::Configuration,
            Self::Model(source) => FailureKind::from(source),
        }
    }

    pub fn user_message(&self) -> String {
        REFINE_FAILURE_MESSAGE.to_string()
    }
}

pub struct RefineService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> RefineService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// Rewrites `content` per the instruction. A blank instruction returns the
    /// content untouched without a call; an empty reply does the same.
    pub fn refine<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &RefineRequest<'_>,
    ) -> Result<String, RefineError> {
        let instruction = request.instruction.trim();
        if instruction.is_empty() {
            return Ok(request.content.to_string());
        }

        let prompt = build_refine_prompt(
            self.prompts,
            request.content,
            instruction,
            request.style_dna,
            request.characters,
        )
        .map_err(RefineError::Prompt)?;
        self.log(LogLevel::Info, format!("开始精修: {instruction}"));
        self.log(LogLevel::Debug, format!("精修提示词:\n{prompt}"));

        let revised = model
            .invoke(&prompt, &GenerationOptions::new())
            .map_err(|source| {
                self.log(LogLevel::Warn, format!("精修失败: {source}"));
                RefineError::Model(source)
            })?;

        if revised.trim().is_empty() {
            self.log(LogLevel::Warn, "精修返回空文本，保留原稿");
            return Ok(request.content.to_string());
        }
        self.log(
            LogLevel::Info,
            format!("精修完成 ({} 字符)", revised.chars().count()),
        );
        Ok(revised)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
