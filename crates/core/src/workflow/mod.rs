//! The session state-holder: stage machine, chapters, roster and the single
//! error slot. Pipelines never touch it directly; every generation is split
//! into a `begin_*` call that validates and snapshots inputs into a job, and a
//! `complete_*` call that commits the job's result.

use crate::blueprint::{
    Blueprint, BlueprintError, BlueprintRequest, BlueprintService, BLANK_OUTLINE_MESSAGE,
};
use crate::config::StudioConfig;
use crate::directors::DirectorStyle;
use crate::generation::{FailureKind, LanguageModel};
use crate::model::{
    valid_characters, Chapter, ChapterStatus, Character, CharacterField, Entropy,
    EntropyOutOfRange,
};
use crate::refine::{RefineError, RefineRequest, RefineService};
use crate::scene::{SceneError, SceneRequest, SceneService};
use crate::style::{StyleError, StyleExtraction, StyleRequest, StyleService};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub const RESET_CONFIRMATION: &str = "确定要重置所有进度吗？";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    StyleInput,
    StyleAnalyzing,
    StyleConfirmed,
    BlueprintInput,
    BlueprintAnalyzing,
    BlueprintReview,
    Production,
}

/// Which of the three screens a stage belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Style,
    Blueprint,
    Production,
}

impl Stage {
    pub fn phase(&self) -> Phase {
        match self {
            Stage::StyleInput | Stage::StyleAnalyzing | Stage::StyleConfirmed => Phase::Style,
            Stage::BlueprintInput | Stage::BlueprintAnalyzing | Stage::BlueprintReview => {
                Phase::Blueprint
            }
            Stage::Production => Phase::Production,
        }
    }

    pub fn is_analyzing(&self) -> bool {
        match self {
            Stage::StyleAnalyzing | Stage::BlueprintAnalyzing => true,
            Stage::StyleInput
            | Stage::StyleConfirmed
            | Stage::BlueprintInput
            | Stage::BlueprintReview
            | Stage::Production => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::StyleInput => "风格输入",
            Stage::StyleAnalyzing => "风格分析中",
            Stage::StyleConfirmed => "风格已确认",
            Stage::BlueprintInput => "大纲输入",
            Stage::BlueprintAnalyzing => "剧情解构中",
            Stage::BlueprintReview => "蓝图审阅",
            Stage::Production => "分场制作",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("cannot {action} while in stage {stage:?}")]
    InvalidStage { action: &'static str, stage: Stage },
    #[error("outline is blank")]
    BlankOutline,
    #[error("blueprint has no sequences to produce")]
    EmptyBlueprint,
    #[error("no chapter with id {0}")]
    UnknownChapter(u32),
    #[error("chapter {0} is already being generated")]
    ChapterBusy(u32),
    #[error("chapter {0} has an open draft")]
    DraftOpen(u32),
    #[error("chapter {0} has no content to refine")]
    NothingToRefine(u32),
    #[error("no character with id `{0}`")]
    UnknownCharacter(String),
    #[error("no draft is open")]
    NoDraft,
    #[error(transparent)]
    Entropy(#[from] EntropyOutOfRange),
}

impl WorkflowError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Validation
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::BlankOutline => BLANK_OUTLINE_MESSAGE.to_string(),
            Self::EmptyBlueprint => "蓝图中没有任何分场，请重新解构。".to_string(),
            Self::ChapterBusy(id) => format!("第 {id} 场正在生成中"),
            Self::DraftOpen(id) => format!("第 {id} 场正在编辑，请先保存或放弃草稿"),
            Self::NothingToRefine(id) => format!("第 {id} 场还没有内容可供精修"),
            other => other.to_string(),
        }
    }
}

/// Whether a completed job's result was written into the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// The session moved on (reset or stage change) while the job ran.
    Discarded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleJob {
    pub epoch: u64,
    pub request: StyleRequest,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlueprintJob {
    pub epoch: u64,
    pub style_dna: String,
    pub outline: String,
    pub characters: Vec<Character>,
    pub entropy: Entropy,
}

impl BlueprintJob {
    pub fn request(&self) -> BlueprintRequest<'_> {
        BlueprintRequest {
            style_dna: &self.style_dna,
            outline: &self.outline,
            characters: &self.characters,
            entropy: self.entropy,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneJob {
    pub epoch: u64,
    pub chapter_id: u32,
    pub index: usize,
    pub chapters: Vec<Chapter>,
    pub style_dna: String,
    pub outline: String,
    pub characters: Vec<Character>,
    pub entropy: Entropy,
}

impl SceneJob {
    pub fn request(&self) -> SceneRequest<'_> {
        SceneRequest {
            index: self.index,
            chapters: &self.chapters,
            style_dna: &self.style_dna,
            outline: &self.outline,
            characters: &self.characters,
            entropy: self.entropy,
        }
    }

    /// Ids of earlier chapters that are not yet completed.
    pub fn unfinished_predecessors(&self) -> Vec<u32> {
        self.chapters[..self.index]
            .iter()
            .filter(|c| c.status != ChapterStatus::Completed)
            .map(|c| c.id)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefineJob {
    pub epoch: u64,
    pub chapter_id: u32,
    pub content: String,
    pub instruction: String,
    pub style_dna: String,
    pub characters: Vec<Character>,
}

impl RefineJob {
    pub fn request(&self) -> RefineRequest<'_> {
        RefineRequest {
            content: &self.content,
            instruction: &self.instruction,
            style_dna: &self.style_dna,
            characters: &self.characters,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Draft {
    pub chapter_id: u32,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: Vec<u32>,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Workflow {
    stage: Stage,
    style: DirectorStyle,
    corpus: String,
    style_dna: String,
    outline: String,
    characters: Vec<Character>,
    entropy: Entropy,
    feasibility: String,
    chapters: Vec<Chapter>,
    current_chapter: Option<u32>,
    draft: Option<Draft>,
    error: Option<String>,
    refining: Option<u32>,
    epoch: u64,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            stage: Stage::StyleInput,
            style: DirectorStyle::default(),
            corpus: String::new(),
            style_dna: String::new(),
            outline: String::new(),
            characters: vec![Character::blank()],
            entropy: Entropy::default(),
            feasibility: String::new(),
            chapters: Vec::new(),
            current_chapter: None,
            draft: None,
            error: None,
            refining: None,
            epoch: 0,
        }
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh session seeded with the configured defaults.
    pub fn from_config(config: &StudioConfig) -> Result<Self, EntropyOutOfRange> {
        Ok(Self::new().with_entropy(Entropy::new(config.default_entropy)?))
    }

    pub fn with_entropy(mut self, entropy: Entropy) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn style(&self) -> DirectorStyle {
        self.style
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    pub fn style_dna(&self) -> &str {
        &self.style_dna
    }

    pub fn outline(&self) -> &str {
        &self.outline
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn valid_characters(&self) -> Vec<Character> {
        valid_characters(&self.characters)
    }

    pub fn entropy(&self) -> Entropy {
        self.entropy
    }

    pub fn feasibility(&self) -> &str {
        &self.feasibility
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter(&self, id: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn current_chapter(&self) -> Option<u32> {
        self.current_chapter
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True while any generation has been started and not yet committed.
    pub fn is_generating(&self) -> bool {
        self.stage.is_analyzing()
            || self.refining.is_some()
            || self
                .chapters
                .iter()
                .any(|c| c.status == ChapterStatus::Generating)
    }

    /// Pending and failed chapters, ascending by id.
    pub fn pending_chapter_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .chapters
            .iter()
            .filter(|c| c.status.is_remaining())
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn completed_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Completed)
            .count()
    }

    pub fn set_style(&mut self, style: DirectorStyle) {
        self.style = style;
    }

    pub fn set_corpus(&mut self, corpus: impl Into<String>) {
        self.corpus = corpus.into();
    }

    pub fn set_outline(&mut self, outline: impl Into<String>) {
        self.outline = outline.into();
    }

    pub fn set_entropy(&mut self, value: f32) -> Result<Entropy, WorkflowError> {
        self.entropy = Entropy::new(value)?;
        Ok(self.entropy)
    }

    pub fn add_character(&mut self) -> String {
        let character = Character::blank();
        let id = character.id.clone();
        self.characters.push(character);
        id
    }

    pub fn push_character(&mut self, character: Character) {
        self.characters.push(character);
    }

    pub fn update_character(
        &mut self,
        id: &str,
        field: CharacterField,
        value: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let character = self
            .characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| WorkflowError::UnknownCharacter(id.to_string()))?;
        let value = value.into();
        match field {
            CharacterField::Name => character.name = value,
            CharacterField::Archetype => character.archetype = value,
            CharacterField::Description => character.description = value,
        }
        Ok(())
    }

    pub fn remove_character(&mut self, id: &str) -> Result<Character, WorkflowError> {
        let position = self
            .characters
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| WorkflowError::UnknownCharacter(id.to_string()))?;
        Ok(self.characters.remove(position))
    }

    pub fn select_chapter(&mut self, id: u32) -> Result<(), WorkflowError> {
        self.require_chapter(id)?;
        self.current_chapter = Some(id);
        Ok(())
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn begin_style_analysis(&mut self) -> Result<StyleJob, WorkflowError> {
        self.require_stage(Stage::StyleInput, "extract style")?;
        self.stage = Stage::StyleAnalyzing;
        self.error = None;
        Ok(StyleJob {
            epoch: self.epoch,
            request: StyleRequest::new(self.style, self.corpus.clone()),
        })
    }

    pub fn complete_style_analysis(
        &mut self,
        job: &StyleJob,
        result: Result<StyleExtraction, StyleError>,
    ) -> Commit {
        if job.epoch != self.epoch || self.stage != Stage::StyleAnalyzing {
            return Commit::Discarded;
        }
        match result {
            Ok(StyleExtraction::Extracted(dna)) => {
                self.style_dna = dna;
                self.stage = Stage::StyleConfirmed;
            }
            Ok(insufficient @ StyleExtraction::InsufficientCorpus) => {
                self.stage = Stage::StyleInput;
                self.error = Some(insufficient.text().to_string());
            }
            Err(error) => {
                self.stage = Stage::StyleInput;
                self.error = Some(error.user_message());
            }
        }
        Commit::Applied
    }

    pub fn confirm_style(&mut self) -> Result<(), WorkflowError> {
        self.require_stage(Stage::StyleConfirmed, "confirm style")?;
        self.stage = Stage::BlueprintInput;
        Ok(())
    }

    pub fn relearn_style(&mut self) -> Result<(), WorkflowError> {
        self.require_stage(Stage::StyleConfirmed, "re-learn style")?;
        self.stage = Stage::StyleInput;
        Ok(())
    }

    pub fn begin_blueprint(&mut self) -> Result<BlueprintJob, WorkflowError> {
        self.require_stage(Stage::BlueprintInput, "generate blueprint")?;
        if self.outline.trim().is_empty() {
            self.error = Some(BLANK_OUTLINE_MESSAGE.to_string());
            return Err(WorkflowError::BlankOutline);
        }
        self.stage = Stage::BlueprintAnalyzing;
        self.error = None;
        Ok(BlueprintJob {
            epoch: self.epoch,
            style_dna: self.style_dna.clone(),
            outline: self.outline.clone(),
            characters: self.valid_characters(),
            entropy: self.entropy,
        })
    }

    pub fn complete_blueprint(
        &mut self,
        job: &BlueprintJob,
        result: Result<Blueprint, BlueprintError>,
    ) -> Commit {
        if job.epoch != self.epoch || self.stage != Stage::BlueprintAnalyzing {
            return Commit::Discarded;
        }
        match result {
            Ok(blueprint) => {
                self.feasibility = blueprint.feasibility;
                self.chapters = blueprint.chapters;
                self.current_chapter = None;
                self.draft = None;
                self.stage = Stage::BlueprintReview;
            }
            Err(error) => {
                self.stage = Stage::BlueprintInput;
                self.error = Some(error.user_message());
            }
        }
        Commit::Applied
    }

    pub fn approve_blueprint(&mut self) -> Result<(), WorkflowError> {
        self.require_stage(Stage::BlueprintReview, "approve blueprint")?;
        let first = self
            .chapters
            .iter()
            .map(|c| c.id)
            .min()
            .ok_or(WorkflowError::EmptyBlueprint)?;
        self.current_chapter = Some(first);
        self.stage = Stage::Production;
        Ok(())
    }

    pub fn retry_blueprint(&mut self) -> Result<(), WorkflowError> {
        self.require_stage(Stage::BlueprintReview, "retry blueprint")?;
        self.chapters.clear();
        self.feasibility.clear();
        self.current_chapter = None;
        self.stage = Stage::BlueprintInput;
        Ok(())
    }

    pub fn begin_scene(&mut self, id: u32) -> Result<SceneJob, WorkflowError> {
        self.require_stage(Stage::Production, "write a scene")?;
        let index = self.chapter_index(id)?;
        if self.chapters[index].status == ChapterStatus::Generating || self.refining == Some(id) {
            return Err(WorkflowError::ChapterBusy(id));
        }
        if self.draft_for(id).is_some() {
            return Err(WorkflowError::DraftOpen(id));
        }

        self.chapters[index].status = ChapterStatus::Generating;
        self.error = None;
        Ok(SceneJob {
            epoch: self.epoch,
            chapter_id: id,
            index,
            chapters: self.chapters.clone(),
            style_dna: self.style_dna.clone(),
            outline: self.outline.clone(),
            characters: self.valid_characters(),
            entropy: self.entropy,
        })
    }

    /// A generated scene also replaces the text of a draft opened on the
    /// chapter while it was being written.
    pub fn complete_scene(&mut self, job: &SceneJob, result: Result<String, SceneError>) -> Commit {
        if job.epoch != self.epoch || self.stage != Stage::Production {
            return Commit::Discarded;
        }
        let Some(chapter) = self.chapters.iter_mut().find(|c| c.id == job.chapter_id) else {
            return Commit::Discarded;
        };
        match result {
            Ok(content) => {
                if let Some(draft) = self.draft.as_mut().filter(|d| d.chapter_id == job.chapter_id) {
                    draft.text = content.clone();
                }
                chapter.content = content;
                chapter.status = ChapterStatus::Completed;
            }
            Err(error) => {
                chapter.status = ChapterStatus::Error;
                self.error = Some(error.user_message());
            }
        }
        Commit::Applied
    }

    /// `Ok(None)` for a blank instruction: nothing to do, nothing is called.
    /// An open draft of the chapter is what gets refined, saved or not.
    pub fn begin_refine(
        &mut self,
        id: u32,
        instruction: &str,
    ) -> Result<Option<RefineJob>, WorkflowError> {
        self.require_stage(Stage::Production, "refine a scene")?;
        let index = self.chapter_index(id)?;
        let chapter = &self.chapters[index];
        if chapter.status == ChapterStatus::Generating || self.refining.is_some() {
            return Err(WorkflowError::ChapterBusy(id));
        }
        let content = match self.draft_for(id) {
            Some(draft) => draft.text.as_str(),
            None => chapter.content.as_str(),
        };
        if content.is_empty() {
            return Err(WorkflowError::NothingToRefine(id));
        }
        if instruction.trim().is_empty() {
            return Ok(None);
        }

        let job = RefineJob {
            epoch: self.epoch,
            chapter_id: id,
            content: content.to_string(),
            instruction: instruction.to_string(),
            style_dna: self.style_dna.clone(),
            characters: self.valid_characters(),
        };
        self.refining = Some(id);
        self.error = None;
        Ok(Some(job))
    }

    /// Refinement output replaces committed content and refreshes an open
    /// draft of the same chapter.
    pub fn complete_refine(&mut self, job: &RefineJob, result: Result<String, RefineError>) -> Commit {
        if job.epoch != self.epoch || self.refining != Some(job.chapter_id) {
            return Commit::Discarded;
        }
        self.refining = None;
        match result {
            Ok(revised) => {
                if let Some(chapter) = self.chapters.iter_mut().find(|c| c.id == job.chapter_id) {
                    chapter.content = revised.clone();
                }
                if let Some(draft) = self.draft.as_mut() {
                    if draft.chapter_id == job.chapter_id {
                        draft.text = revised;
                    }
                }
            }
            Err(error) => {
                self.error = Some(error.user_message());
            }
        }
        Commit::Applied
    }

    pub fn open_editor(&mut self, id: u32) -> Result<&Draft, WorkflowError> {
        let index = self.chapter_index(id)?;
        let text = self.chapters[index].content.clone();
        Ok(&*self.draft.insert(Draft {
            chapter_id: id,
            text,
        }))
    }

    pub fn update_draft(&mut self, text: impl Into<String>) -> Result<(), WorkflowError> {
        let draft = self.draft.as_mut().ok_or(WorkflowError::NoDraft)?;
        draft.text = text.into();
        Ok(())
    }

    /// Commits the draft as the chapter's content; status is left alone.
    pub fn save_draft(&mut self) -> Result<u32, WorkflowError> {
        let draft = self.draft.take().ok_or(WorkflowError::NoDraft)?;
        match self.chapters.iter_mut().find(|c| c.id == draft.chapter_id) {
            Some(chapter) => {
                chapter.content = draft.text;
                Ok(draft.chapter_id)
            }
            None => Err(WorkflowError::UnknownChapter(draft.chapter_id)),
        }
    }

    pub fn cancel_draft(&mut self) -> Option<Draft> {
        self.draft.take()
    }

    /// Open, replace and save in one step.
    pub fn edit_chapter(&mut self, id: u32, content: impl Into<String>) -> Result<(), WorkflowError> {
        self.open_editor(id)?;
        self.update_draft(content)?;
        self.save_draft().map(|_| ())
    }

    /// Back to the first stage. Outline, roster, corpus and entropy survive.
    /// The epoch only moves when something was in flight, so a second reset
    /// leaves the session exactly as the first one did.
    pub fn reset(&mut self) {
        if self.is_generating() {
            self.epoch += 1;
        }
        self.stage = Stage::StyleInput;
        self.style_dna.clear();
        self.feasibility.clear();
        self.chapters.clear();
        self.current_chapter = None;
        self.draft = None;
        self.error = None;
        self.refining = None;
    }

    /// Repairs a session loaded after the process died mid-generation.
    pub fn recover_interrupted(&mut self) -> bool {
        let mut changed = false;
        match self.stage {
            Stage::StyleAnalyzing => {
                self.stage = Stage::StyleInput;
                changed = true;
            }
            Stage::BlueprintAnalyzing => {
                self.stage = Stage::BlueprintInput;
                changed = true;
            }
            Stage::StyleInput
            | Stage::StyleConfirmed
            | Stage::BlueprintInput
            | Stage::BlueprintReview
            | Stage::Production => {}
        }
        for chapter in &mut self.chapters {
            if chapter.status == ChapterStatus::Generating {
                chapter.status = ChapterStatus::Error;
                changed = true;
            }
        }
        if self.refining.take().is_some() {
            changed = true;
        }
        if changed {
            self.epoch += 1;
        }
        changed
    }

    pub fn extract_style<M: LanguageModel + ?Sized>(
        &mut self,
        service: &StyleService<'_>,
        model: &M,
    ) -> Result<Commit, WorkflowError> {
        let job = self.begin_style_analysis()?;
        let result = service.extract(model, &job.request);
        Ok(self.complete_style_analysis(&job, result))
    }

    pub fn generate_blueprint<M: LanguageModel + ?Sized>(
        &mut self,
        service: &BlueprintService<'_>,
        model: &M,
    ) -> Result<Commit, WorkflowError> {
        let job = self.begin_blueprint()?;
        let result = service.generate(model, &job.request());
        Ok(self.complete_blueprint(&job, result))
    }

    pub fn write_chapter<M: LanguageModel + ?Sized>(
        &mut self,
        service: &SceneService<'_>,
        model: &M,
        id: u32,
    ) -> Result<Commit, WorkflowError> {
        let job = self.begin_scene(id)?;
        let result = service.write(model, &job.request());
        Ok(self.complete_scene(&job, result))
    }

    /// Writes every pending or failed chapter in ascending order, pausing
    /// `pacing` between attempts. A failure never stops the run.
    pub fn write_all_remaining<M: LanguageModel + ?Sized>(
        &mut self,
        service: &SceneService<'_>,
        model: &M,
        pacing: Duration,
    ) -> Result<BatchReport, WorkflowError> {
        self.require_stage(Stage::Production, "write remaining scenes")?;
        let mut report = BatchReport::default();
        let ids = self.pending_chapter_ids();
        for (position, id) in ids.iter().copied().enumerate() {
            let job = match self.begin_scene(id) {
                Ok(job) => job,
                Err(WorkflowError::ChapterBusy(_) | WorkflowError::DraftOpen(_)) => {
                    report.skipped.push(id);
                    continue;
                }
                Err(other) => return Err(other),
            };
            let result = service.write(model, &job.request());
            let succeeded = result.is_ok();
            self.complete_scene(&job, result);
            if succeeded {
                report.completed.push(id);
            } else {
                report.failed.push(id);
            }
            if position + 1 < ids.len() && !pacing.is_zero() {
                thread::sleep(pacing);
            }
        }
        Ok(report)
    }

    pub fn refine_chapter<M: LanguageModel + ?Sized>(
        &mut self,
        service: &RefineService<'_>,
        model: &M,
        id: u32,
        instruction: &str,
    ) -> Result<Commit, WorkflowError> {
        let Some(job) = self.begin_refine(id, instruction)? else {
            return Ok(Commit::Discarded);
        };
        let result = service.refine(model, &job.request());
        Ok(self.complete_refine(&job, result))
    }

    fn require_stage(&self, expected: Stage, action: &'static str) -> Result<(), WorkflowError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(WorkflowError::InvalidStage {
                action,
                stage: self.stage,
            })
        }
    }

    fn draft_for(&self, id: u32) -> Option<&Draft> {
        self.draft.as_ref().filter(|d| d.chapter_id == id)
    }

    fn chapter_index(&self, id: u32) -> Result<usize, WorkflowError> {
        self.chapters
            .iter()
            .position(|c| c.id == id)
            .ok_or(WorkflowError::UnknownChapter(id))
    }

    fn require_chapter(&self, id: u32) -> Result<(), WorkflowError> {
        self.chapter_index(id).map(|_| ())
    }
}
