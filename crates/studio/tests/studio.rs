use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use remix_core::{
    ChapterStatus, Commit, DirectorStyle, GenerationOptions, LanguageModel, LanguageModelError,
    LogLevel, PromptRegistry, SharedLogSink, Stage, StudioConfig, VecLogSink, Workflow,
};
use remix_studio::Studio;

const BLUEPRINT_JSON: &str = r#"{
    "feasibilityReport": "把家宴换成修理铺的晚饭。",
    "sequences": [
        { "title": "开铺", "summary": "卷帘门拉起" },
        { "title": "来客", "summary": "旧客户上门" },
        { "title": "打烊", "summary": "灯一盏盏灭" }
    ]
}"#;

/// Sleeps on every scene call and records how many calls overlap.
struct SlowModel {
    delay: Duration,
    fail_sequence: Mutex<Option<u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    scene_calls: AtomicUsize,
    total_calls: AtomicUsize,
}

impl SlowModel {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail_sequence: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            scene_calls: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
        })
    }

    fn fail_on(&self, id: Option<u32>) {
        *self.fail_sequence.lock().unwrap() = id;
    }
}

fn sequence_id(prompt: &str) -> Option<u32> {
    let rest = prompt.split("content for SEQUENCE ").nth(1)?;
    rest.split(':').next()?.trim().parse().ok()
}

impl LanguageModel for SlowModel {
    fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LanguageModelError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if options.wants_json() {
            return Ok(BLUEPRINT_JSON.to_string());
        }
        let Some(id) = sequence_id(prompt) else {
            if prompt.contains("USER INSTRUCTION") || prompt.contains("修改指令") {
                return Ok("REFINED".to_string());
            }
            return Ok("【风格基因】克制的长镜头。".to_string());
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.scene_calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.fail_sequence.lock().unwrap() == Some(id) {
            return Err(LanguageModelError::backend_message("scripted scene failure"));
        }
        Ok(format!("SCENE-BODY-{id}"))
    }
}

fn studio_with(model: Arc<SlowModel>, pacing_ms: u64) -> (Studio, Arc<VecLogSink>) {
    let sink = Arc::new(VecLogSink::new());
    let shared: SharedLogSink = sink.clone();
    let config = StudioConfig {
        pacing_ms,
        ..StudioConfig::default()
    };
    let studio = Studio::new(
        Workflow::new(),
        model,
        Arc::new(PromptRegistry::new().unwrap()),
        shared,
        config,
    );
    (studio, sink)
}

async fn to_production(studio: &Studio) {
    studio.update(|w| w.set_style(DirectorStyle::AngLee));
    assert_eq!(studio.extract_style().await.unwrap(), Commit::Applied);
    studio.update(|w| w.confirm_style()).unwrap();
    studio.update(|w| w.set_outline("夜里的修理铺"));
    assert_eq!(studio.create_blueprint().await.unwrap(), Commit::Applied);
    studio.update(|w| w.approve_blueprint()).unwrap();
    assert_eq!(studio.snapshot().stage(), Stage::Production);
}

fn status_of(studio: &Studio, id: u32) -> ChapterStatus {
    studio.snapshot().chapter(id).unwrap().status
}

#[tokio::test]
async fn batch_continues_past_failures_and_reruns_only_the_failed() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model.clone(), 0);
    to_production(&studio).await;

    model.fail_on(Some(2));
    let report = studio.write_all_remaining().await.unwrap();
    assert_eq!(report.completed, vec![1, 3]);
    assert_eq!(report.failed, vec![2]);
    assert_eq!(status_of(&studio, 2), ChapterStatus::Error);

    model.fail_on(None);
    let rerun = studio.write_all_remaining().await.unwrap();
    assert_eq!(rerun.completed, vec![2]);
    assert_eq!(studio.snapshot().completed_count(), 3);
    assert_eq!(model.scene_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn concurrent_writes_never_overlap() {
    let model = SlowModel::new(Duration::from_millis(30));
    let (studio, _sink) = studio_with(model.clone(), 0);
    to_production(&studio).await;

    let handles: Vec<_> = [3, 1, 2].into_iter().map(|id| studio.spawn_write(id)).collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Commit::Applied);
    }

    assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(studio.snapshot().completed_count(), 3);
}

#[tokio::test]
async fn writing_out_of_order_is_logged() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, sink) = studio_with(model, 0);
    to_production(&studio).await;

    studio.write_chapter(3).await.unwrap();
    assert_eq!(status_of(&studio, 3), ChapterStatus::Completed);
    assert!(sink.contains(LogLevel::Warn, "第 3 场先于未完成的场次"));
}

#[tokio::test]
async fn reset_aborts_spawned_writes() {
    let model = SlowModel::new(Duration::from_millis(200));
    let (studio, sink) = studio_with(model, 0);
    to_production(&studio).await;

    let handle = studio.spawn_write(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(status_of(&studio, 1), ChapterStatus::Generating);

    studio.reset();
    let joined = handle.await;
    assert!(joined.unwrap_err().is_cancelled());
    assert!(sink.contains(LogLevel::Info, "已取消 1 个"));

    // The blocking call still finishes; nothing may land afterwards.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = studio.snapshot();
    assert_eq!(session.stage(), Stage::StyleInput);
    assert!(session.chapters().is_empty());
}

#[tokio::test]
async fn reset_while_awaited_discards_the_late_result() {
    let model = SlowModel::new(Duration::from_millis(150));
    let (studio, _sink) = studio_with(model, 0);
    to_production(&studio).await;

    let resetter = studio.clone();
    let (commit, ()) = tokio::join!(studio.write_chapter(1), async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        resetter.reset();
    });

    assert_eq!(commit.unwrap(), Commit::Discarded);
    assert!(studio.snapshot().chapters().is_empty());
}

#[tokio::test]
async fn batch_pauses_between_chapters() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model, 60);
    to_production(&studio).await;

    let started = Instant::now();
    let report = studio.write_all_remaining().await.unwrap();
    assert_eq!(report.completed.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn blank_refinement_makes_no_call() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model.clone(), 0);
    to_production(&studio).await;
    studio.write_chapter(1).await.unwrap();
    let calls_before = model.total_calls.load(Ordering::SeqCst);

    let commit = studio.refine_chapter(1, "   ").await.unwrap();
    assert_eq!(commit, Commit::Discarded);
    assert_eq!(studio.snapshot().chapter(1).unwrap().content, "SCENE-BODY-1");
    assert_eq!(model.total_calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn refinement_replaces_content() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model, 0);
    to_production(&studio).await;
    studio.write_chapter(2).await.unwrap();

    let commit = studio.refine_chapter(2, "加一段雨声").await.unwrap();
    assert_eq!(commit, Commit::Applied);
    assert_eq!(studio.snapshot().chapter(2).unwrap().content, "REFINED");
}

#[tokio::test]
async fn actions_out_of_stage_are_rejected() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model, 0);

    let err = studio.write_chapter(1).await.unwrap_err();
    assert!(matches!(err, remix_studio::StudioError::Workflow(_)));
    assert!(!err.user_message().is_empty());
}

#[tokio::test]
async fn batch_skips_chapter_open_in_editor() {
    let model = SlowModel::new(Duration::ZERO);
    let (studio, _sink) = studio_with(model, 0);
    to_production(&studio).await;
    studio.update(|w| w.open_editor(2).map(|_| ())).unwrap();

    let report = studio.write_all_remaining().await.unwrap();
    assert_eq!(report.completed, vec![1, 3]);
    assert_eq!(report.skipped, vec![2]);
    assert_eq!(status_of(&studio, 2), ChapterStatus::Pending);
}
