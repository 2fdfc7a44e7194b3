use crate::generation::{
    strip_code_fences, FailureKind, GenerationOptions, LanguageModel, LanguageModelError,
};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{Chapter, Character, Entropy};
use crate::prompts::{build_blueprint_prompt, PromptError, PromptRegistry};
use serde_json::{json, Value};
use thiserror::Error;

pub const FEASIBILITY_FALLBACK: &str = "分析完成。";
pub const BLUEPRINT_FAILURE_MESSAGE: &str = "剧情解构失败，请重试。";
pub const BLANK_OUTLINE_MESSAGE: &str = "请输入故事大纲";

#[derive(Clone, Copy, Debug)]
pub struct BlueprintRequest<'r> {
    pub style_dna: &'r str,
    pub outline: &'r str,
    /// Already filtered to valid characters.
    pub characters: &'r [Character],
    pub entropy: Entropy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blueprint {
    pub feasibility: String,
    pub chapters: Vec<Chapter>,
}

impl Blueprint {
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("outline is blank")]
    BlankOutline,
    #[error("failed to render blueprint prompt: {0}")]
    Prompt(#[source] PromptError),
    #[error("blueprint call failed: {0}")]
    Model(#[source] LanguageModelError),
    #[error("blueprint response is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("blueprint response is not a JSON object")]
    NotAnObject,
}

impl BlueprintError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::BlankOutline => FailureKind::Validation,
            Self::Prompt(_) => FailureKind::Configuration,
            Self::Model(source) => FailureKind::from(source),
            Self::Parse(_) | Self::NotAnObject => FailureKind::Backend,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::BlankOutline => BLANK_OUTLINE_MESSAGE.to_string(),
            _ => BLUEPRINT_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Structured-output schema sent with every blueprint call, in the uppercase
/// type vocabulary Gemini expects. Adapters translate it for other backends.
pub fn blueprint_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "feasibilityReport": {
                "type": "STRING",
                "description": "Markdown strategy explaining how the style lens is mapped onto the outline's genre."
            },
            "sequences": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "summary": {
                            "type": "STRING",
                            "description": "Visuals and subtext of the sequence."
                        }
                    },
                    "required": ["title", "summary"]
                }
            }
        },
        "required": ["feasibilityReport", "sequences"]
    })
}

pub struct BlueprintService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> BlueprintService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &BlueprintRequest<'_>,
    ) -> Result<Blueprint, BlueprintError> {
        if request.outline.trim().is_empty() {
            return Err(BlueprintError::BlankOutline);
        }

        let prompt = build_blueprint_prompt(
            self.prompts,
            request.style_dna,
            request.outline,
            request.characters,
        )
        .map_err(BlueprintError::Prompt)?;
        self.log(
            LogLevel::Info,
            format!(
                "开始剧情解构: {} 个角色, entropy {}",
                request.characters.len(),
                request.entropy
            ),
        );
        self.log(LogLevel::Debug, format!("剧情解构提示词:\n{prompt}"));

        let options = GenerationOptions::new()
            .with_schema(blueprint_schema())
            .with_temperature(request.entropy.value());
        let response = model.invoke(&prompt, &options).map_err(|source| {
            self.log(LogLevel::Warn, format!("剧情解构调用失败: {source}"));
            BlueprintError::Model(source)
        })?;

        let blueprint = parse_blueprint(&response).map_err(|err| {
            self.log(LogLevel::Warn, format!("剧情解构响应无法解析: {err}"));
            err
        })?;
        if blueprint.is_empty() {
            self.log(LogLevel::Warn, "剧情解构未返回任何分场");
        } else {
            self.log(
                LogLevel::Info,
                format!("剧情解构完成: {} 场", blueprint.chapters.len()),
            );
        }
        Ok(blueprint)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Turns the structured response into chapters numbered `1..=N` by position.
/// A missing or non-array `sequences` yields no chapters; a blank
/// `feasibilityReport` falls back to a fixed note.
pub fn parse_blueprint(response: &str) -> Result<Blueprint, BlueprintError> {
    let value: Value =
        serde_json::from_str(strip_code_fences(response)).map_err(BlueprintError::Parse)?;
    let object = value.as_object().ok_or(BlueprintError::NotAnObject)?;

    let feasibility = object
        .get("feasibilityReport")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(FEASIBILITY_FALLBACK)
        .to_string();

    let chapters = object
        .get("sequences")
        .and_then(Value::as_array)
        .map(|sequences| {
            sequences
                .iter()
                .zip(1u32..)
                .map(|(entry, id)| {
                    let field = |name: &str| {
                        entry
                            .get(name)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    Chapter::stub(id, field("title"), field("summary"))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Blueprint {
        feasibility,
        chapters,
    })
}
