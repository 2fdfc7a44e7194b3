pub mod access;
pub mod blueprint;
pub mod config;
pub mod directors;
pub mod export;
pub mod generation;
pub mod logging;
pub mod model;
pub mod prompts;
pub mod refine;
pub mod scene;
pub mod session;
pub mod style;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use access::{AccessError, AccessGate, ACCESS_FILE_NAME};
pub use blueprint::{
    blueprint_schema, parse_blueprint, Blueprint, BlueprintError, BlueprintRequest,
    BlueprintService, BLANK_OUTLINE_MESSAGE, BLUEPRINT_FAILURE_MESSAGE, FEASIBILITY_FALLBACK,
};
pub use config::{
    AccessConfig, Config, ConfigError, ConfigStore, LlmConfig, PromptConfig, RecentUsage,
    StudioConfig,
};
pub use directors::{DirectorProfile, DirectorStyle, UnknownDirectorStyle, DIRECTORS};
pub use export::{export_file_name, export_script, UNWRITTEN_PLACEHOLDER};
pub use generation::{
    strip_code_fences, FailureKind, GenerationOptions, LanguageModel, LanguageModelError,
};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use model::{
    valid_characters, Chapter, ChapterStatus, Character, CharacterField, Entropy,
    EntropyOutOfRange, DEFAULT_ENTROPY, ENTROPY_MAX, ENTROPY_MIN,
};
pub use prompts::{PromptArguments, PromptError, PromptKey, PromptRegistry, PromptSource, PromptTemplate};
pub use refine::{RefineError, RefineRequest, RefineService, REFINE_FAILURE_MESSAGE};
pub use scene::{SceneError, SceneRequest, SceneService};
pub use session::{SessionError, SessionStore, SESSION_FILE_NAME};
pub use style::{
    StyleError, StyleExtraction, StyleRequest, StyleService, EMPTY_STYLE_FALLBACK,
    INSUFFICIENT_CORPUS_MESSAGE, STYLE_FAILURE_MESSAGE,
};
pub use workflow::{
    BatchReport, BlueprintJob, Commit, Draft, Phase, RefineJob, SceneJob, Stage, StyleJob,
    Workflow, WorkflowError, RESET_CONFIRMATION,
};
