use crate::generation::{FailureKind, GenerationOptions, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{Chapter, Character, Entropy};
use crate::prompts::{build_scene_prompt, PromptError, PromptRegistry};
use thiserror::Error;

#[derive(Clone, Copy, Debug)]
pub struct SceneRequest<'r> {
    /// Position of the target chapter inside `chapters`.
    pub index: usize,
    pub chapters: &'r [Chapter],
    pub style_dna: &'r str,
    pub outline: &'r str,
    pub characters: &'r [Character],
    pub entropy: Entropy,
}

impl SceneRequest<'_> {
    pub fn target(&self) -> Option<&Chapter> {
        self.chapters.get(self.index)
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no sequence at index {index} (blueprint has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("failed to render prompt for sequence {id}: {source}")]
    Prompt {
        id: u32,
        #[source]
        source: PromptError,
    },
    #[error("writing sequence {id} failed: {source}")]
    Model {
        id: u32,
        #[source]
        source: LanguageModelError,
    },
}

impl SceneError {
    pub fn chapter_id(&self) -> u32 {
        match self {
            Self::IndexOutOfRange { index, .. } => u32::try_from(*index + 1).unwrap_or(u32::MAX),
            Self::Prompt { id, .. } | Self::Model { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::IndexOutOfRange { .. } => FailureKind::Validation,
            Self::Prompt { .. } => FailureKind::Configuration,
            Self::Model { source, .. } => FailureKind::from(source),
        }
    }

    pub fn user_message(&self) -> String {
        format!("第 {} 场写入失败", self.chapter_id())
    }
}

pub struct SceneService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> SceneService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// Writes the target sequence. The text comes back verbatim, possibly empty.
    pub fn write<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &SceneRequest<'_>,
    ) -> Result<String, SceneError> {
        let target = request.target().ok_or(SceneError::IndexOutOfRange {
            index: request.index,
            len: request.chapters.len(),
        })?;
        let id = target.id;

        let prompt = build_scene_prompt(
            self.prompts,
            request.index,
            request.chapters,
            request.style_dna,
            request.outline,
            request.characters,
        )
        .map_err(|source| SceneError::Prompt { id, source })?;

        let empty_context = request.chapters[..request.index]
            .iter()
            .filter(|c| !c.has_content())
            .count();
        if empty_context > 0 {
            self.log(
                LogLevel::Warn,
                format!("第 {id} 场之前仍有 {empty_context} 场没有内容，上下文不完整"),
            );
        }
        self.log(
            LogLevel::Info,
            format!("开始写第 {id} 场: {} (entropy {})", target.title, request.entropy),
        );
        self.log(LogLevel::Debug, format!("第 {id} 场提示词:\n{prompt}"));

        let options = GenerationOptions::new().with_temperature(request.entropy.value());
        let content = model.invoke(&prompt, &options).map_err(|source| {
            self.log(LogLevel::Warn, format!("第 {id} 场写入失败: {source}"));
            SceneError::Model { id, source }
        })?;

        if content.trim().is_empty() {
            self.log(LogLevel::Warn, format!("第 {id} 场返回空文本"));
        } else {
            self.log(
                LogLevel::Info,
                format!("第 {id} 场完成 ({} 字符)", content.chars().count()),
            );
        }
        Ok(content)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
