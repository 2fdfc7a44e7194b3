//! Async driver around [`Workflow`]. Pipelines are synchronous and run on the
//! blocking pool; the workflow lock is only taken to begin and commit jobs,
//! never across an await. A session-wide gate admits one generation at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use remix_core::config::StudioConfig;
use remix_core::logging::{LogLevel, LogRecord, SharedLogSink};
use remix_core::{
    BatchReport, BlueprintService, ChapterStatus, Commit, LanguageModel, PromptRegistry,
    RefineService, SceneService, Stage, StyleService, Workflow, WorkflowError,
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("后台任务崩溃: {0}")]
    Join(String),
}

impl StudioError {
    pub fn user_message(&self) -> String {
        match self {
            StudioError::Workflow(err) => err.user_message(),
            StudioError::Join(_) => self.to_string(),
        }
    }
}

struct Inner {
    workflow: Mutex<Workflow>,
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptRegistry>,
    sink: SharedLogSink,
    config: StudioConfig,
    generation: AsyncMutex<()>,
    /// Handles of tasks started with `spawn_*`, aborted on reset.
    tasks: Mutex<Vec<AbortHandle>>,
}

#[derive(Clone)]
pub struct Studio {
    inner: Arc<Inner>,
}

impl Studio {
    pub fn new(
        workflow: Workflow,
        model: Arc<dyn LanguageModel>,
        prompts: Arc<PromptRegistry>,
        sink: SharedLogSink,
        config: StudioConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                workflow: Mutex::new(workflow),
                model,
                prompts,
                sink,
                config,
                generation: AsyncMutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.inner.config
    }

    /// A consistent copy of the whole session.
    pub fn snapshot(&self) -> Workflow {
        self.workflow().clone()
    }

    /// Applies a synchronous edit (roster, outline, entropy, drafts...).
    pub fn update<R>(&self, edit: impl FnOnce(&mut Workflow) -> R) -> R {
        edit(&mut self.workflow())
    }

    pub async fn extract_style(&self) -> Result<Commit, StudioError> {
        let _slot = self.inner.generation.lock().await;
        let job = self.workflow().begin_style_analysis()?;

        let (prompts, sink, model) = self.pipeline_parts();
        let config = self.inner.config.clone();
        let (job, result) = tokio::task::spawn_blocking(move || {
            let service = StyleService::new(&prompts, &*sink).with_limits(&config);
            let result = service.extract(&*model, &job.request);
            (job, result)
        })
        .await
        .map_err(|err| StudioError::Join(err.to_string()))?;

        Ok(self.workflow().complete_style_analysis(&job, result))
    }

    pub async fn create_blueprint(&self) -> Result<Commit, StudioError> {
        let _slot = self.inner.generation.lock().await;
        let job = self.workflow().begin_blueprint()?;

        let (prompts, sink, model) = self.pipeline_parts();
        let (job, result) = tokio::task::spawn_blocking(move || {
            let service = BlueprintService::new(&prompts, &*sink);
            let result = service.generate(&*model, &job.request());
            (job, result)
        })
        .await
        .map_err(|err| StudioError::Join(err.to_string()))?;

        Ok(self.workflow().complete_blueprint(&job, result))
    }

    pub async fn write_chapter(&self, id: u32) -> Result<Commit, StudioError> {
        let _slot = self.inner.generation.lock().await;
        self.write_chapter_locked(id).await
    }

    /// Starts a write in the background; reset aborts it.
    pub fn spawn_write(&self, id: u32) -> JoinHandle<Result<Commit, StudioError>> {
        let studio = self.clone();
        let handle = tokio::spawn(async move { studio.write_chapter(id).await });
        self.remember_task(handle.abort_handle());
        handle
    }

    /// Writes every pending or failed chapter in ascending id order. The gate
    /// is released between chapters so manual writes can slip in; chapters
    /// they complete are skipped. Failures are recorded and the run goes on.
    pub async fn write_all_remaining(&self) -> Result<BatchReport, StudioError> {
        let ids = self.workflow().pending_chapter_ids();
        let pacing = self.inner.config.pacing();
        let mut report = BatchReport::default();
        self.log(LogLevel::Info, format!("批量写入 {} 场", ids.len()));

        for (position, id) in ids.iter().copied().enumerate() {
            {
                let _slot = self.inner.generation.lock().await;
                let still_remaining = {
                    let workflow = self.workflow();
                    if workflow.stage() != Stage::Production {
                        self.log(LogLevel::Warn, "批量写入中止：会话已离开制作阶段");
                        return Ok(report);
                    }
                    workflow
                        .chapter(id)
                        .map(|c| c.status.is_remaining())
                        .unwrap_or(false)
                };
                if !still_remaining {
                    report.skipped.push(id);
                    continue;
                }

                match self.write_chapter_locked(id).await {
                    Ok(Commit::Applied) => {
                        let completed = self
                            .workflow()
                            .chapter(id)
                            .map(|c| c.status == ChapterStatus::Completed)
                            .unwrap_or(false);
                        if completed {
                            report.completed.push(id);
                        } else {
                            report.failed.push(id);
                        }
                    }
                    Ok(Commit::Discarded) => return Ok(report),
                    Err(StudioError::Workflow(
                        WorkflowError::ChapterBusy(_) | WorkflowError::DraftOpen(_),
                    )) => {
                        report.skipped.push(id);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            if position + 1 < ids.len() && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        self.log(
            LogLevel::Info,
            format!(
                "批量写入结束: 完成 {} 场, 失败 {} 场",
                report.completed.len(),
                report.failed.len()
            ),
        );
        Ok(report)
    }

    pub fn spawn_write_all(&self) -> JoinHandle<Result<BatchReport, StudioError>> {
        let studio = self.clone();
        let handle = tokio::spawn(async move { studio.write_all_remaining().await });
        self.remember_task(handle.abort_handle());
        handle
    }

    /// `Commit::Discarded` when the instruction is blank and nothing ran.
    pub async fn refine_chapter(&self, id: u32, instruction: &str) -> Result<Commit, StudioError> {
        let _slot = self.inner.generation.lock().await;
        let Some(job) = self.workflow().begin_refine(id, instruction)? else {
            return Ok(Commit::Discarded);
        };

        let (prompts, sink, model) = self.pipeline_parts();
        let (job, result) = tokio::task::spawn_blocking(move || {
            let service = RefineService::new(&prompts, &*sink);
            let result = service.refine(&*model, &job.request());
            (job, result)
        })
        .await
        .map_err(|err| StudioError::Join(err.to_string()))?;

        Ok(self.workflow().complete_refine(&job, result))
    }

    /// Aborts every spawned generation, then resets the session. Work already
    /// running on the blocking pool finishes but its result is discarded.
    pub fn reset(&self) {
        let handles: Vec<AbortHandle> = self.tasks().drain(..).collect();
        let running = handles.iter().filter(|h| !h.is_finished()).count();
        for handle in &handles {
            handle.abort();
        }
        if running > 0 {
            self.log(LogLevel::Info, format!("已取消 {running} 个进行中的任务"));
        }
        self.workflow().reset();
    }

    async fn write_chapter_locked(&self, id: u32) -> Result<Commit, StudioError> {
        let job = self.workflow().begin_scene(id)?;
        let unfinished = job.unfinished_predecessors();
        if !unfinished.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("第 {id} 场先于未完成的场次 {unfinished:?} 写入"),
            );
        }

        let (prompts, sink, model) = self.pipeline_parts();
        let (job, result) = tokio::task::spawn_blocking(move || {
            let service = SceneService::new(&prompts, &*sink);
            let result = service.write(&*model, &job.request());
            (job, result)
        })
        .await
        .map_err(|err| StudioError::Join(err.to_string()))?;

        let commit = self.workflow().complete_scene(&job, result);
        if commit == Commit::Discarded {
            self.log(LogLevel::Info, format!("第 {id} 场的结果已过期，丢弃"));
        }
        Ok(commit)
    }

    fn pipeline_parts(&self) -> (Arc<PromptRegistry>, SharedLogSink, Arc<dyn LanguageModel>) {
        (
            Arc::clone(&self.inner.prompts),
            Arc::clone(&self.inner.sink),
            Arc::clone(&self.inner.model),
        )
    }

    fn workflow(&self) -> MutexGuard<'_, Workflow> {
        self.inner
            .workflow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<AbortHandle>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remember_task(&self, handle: AbortHandle) {
        let mut tasks = self.tasks();
        tasks.retain(|existing| !existing.is_finished());
        tasks.push(handle);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.inner.sink.log(LogRecord::new(level, message.into()));
    }
}
