use crate::config::StudioConfig;
use crate::directors::DirectorStyle;
use crate::generation::{FailureKind, GenerationOptions, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{build_style_prompt, PromptError, PromptRegistry};
use thiserror::Error;

pub const INSUFFICIENT_CORPUS_MESSAGE: &str = "语料不足。请粘贴更多剧本原文或选择预设风格。";
pub const EMPTY_STYLE_FALLBACK: &str = "无法提取风格。";
pub const STYLE_FAILURE_MESSAGE: &str = "风格学习失败，请检查网络或API Key。";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleRequest {
    pub style: DirectorStyle,
    pub corpus: String,
}

impl StyleRequest {
    pub fn new(style: DirectorStyle, corpus: impl Into<String>) -> Self {
        Self {
            style,
            corpus: corpus.into(),
        }
    }

    /// The custom style reads only the pasted corpus; presets append their
    /// sample after whatever the user pasted.
    pub fn reference_material(&self) -> String {
        if self.style.is_custom() {
            return self.corpus.clone();
        }
        let sample = self.style.sample_corpus();
        if self.corpus.is_empty() {
            sample.to_string()
        } else {
            format!("{}\n\n{}", self.corpus, sample)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StyleExtraction {
    Extracted(String),
    /// Reference material was under the minimum length; nothing was sent.
    InsufficientCorpus,
}

impl StyleExtraction {
    pub fn text(&self) -> &str {
        match self {
            Self::Extracted(text) => text,
            Self::InsufficientCorpus => INSUFFICIENT_CORPUS_MESSAGE,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientCorpus)
    }
}

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("failed to render style prompt: {0}")]
    Prompt(#[source] PromptError),
    #[error("style extraction call failed: {0}")]
    Model(#[source] LanguageModelError),
}

impl StyleError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Prompt(_) => FailureKind::Configuration,
            Self::Model(source) => FailureKind::from(source),
        }
    }

    pub fn user_message(&self) -> String {
        STYLE_FAILURE_MESSAGE.to_string()
    }
}

pub struct StyleService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    min_corpus_chars: usize,
    max_corpus_chars: usize,
}

impl<'a> StyleService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        let defaults = StudioConfig::default();
        Self {
            prompts,
            sink,
            min_corpus_chars: defaults.min_corpus_chars,
            max_corpus_chars: defaults.max_corpus_chars,
        }
    }

    pub fn with_limits(mut self, config: &StudioConfig) -> Self {
        self.min_corpus_chars = config.min_corpus_chars;
        self.max_corpus_chars = config.max_corpus_chars.max(config.min_corpus_chars);
        self
    }

    pub fn extract<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StyleRequest,
    ) -> Result<StyleExtraction, StyleError> {
        let reference = request.reference_material();
        let length = reference.chars().count();
        if length < self.min_corpus_chars {
            self.log(
                LogLevel::Warn,
                format!(
                    "风格语料仅 {length} 字符，低于 {} 字符下限，跳过提取",
                    self.min_corpus_chars
                ),
            );
            return Ok(StyleExtraction::InsufficientCorpus);
        }

        let reference = truncate_chars(&reference, self.max_corpus_chars);
        let prompt = build_style_prompt(self.prompts, reference).map_err(StyleError::Prompt)?;
        self.log(
            LogLevel::Info,
            format!("开始提取风格基因: {} ({length} 字符语料)", request.style),
        );
        self.log(LogLevel::Debug, format!("风格提取提示词:\n{prompt}"));

        let response = model
            .invoke(&prompt, &GenerationOptions::new())
            .map_err(|source| {
                self.log(LogLevel::Warn, format!("风格提取失败: {source}"));
                StyleError::Model(source)
            })?;

        let text = response.trim();
        if text.is_empty() {
            self.log(LogLevel::Warn, "风格提取返回空文本");
            return Ok(StyleExtraction::Extracted(EMPTY_STYLE_FALLBACK.to_string()));
        }
        self.log(LogLevel::Info, format!("风格基因提取完成 ({} 字符)", text.chars().count()));
        Ok(StyleExtraction::Extracted(response))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Longest prefix of `text` holding at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
