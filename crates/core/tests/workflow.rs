use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use remix_core::{
    export_script, BlueprintService, ChapterStatus, Character, Commit, DirectorStyle,
    GenerationOptions, LanguageModel, LanguageModelError, PromptRegistry, RefineService,
    SceneService, Stage, StyleService, VecLogSink, Workflow, INSUFFICIENT_CORPUS_MESSAGE,
};

const BLUEPRINT_JSON: &str = r#"{
    "feasibilityReport": "用维修仪式替换烹饪仪式。",
    "sequences": [
        { "title": "早班", "summary": "修理义肢" },
        { "title": "夜市", "summary": "买多一份面" },
        { "title": "停电", "summary": "雨一直下" }
    ]
}"#;

/// Answers JSON for schema calls, a per-sequence marker for scene calls, and
/// fails any scene whose header matches `fail_sequence`.
struct StudioMock {
    fail_sequence: Mutex<Option<u32>>,
    scripted: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, GenerationOptions)>>,
}

impl StudioMock {
    fn new() -> Self {
        Self {
            fail_sequence: Mutex::new(None),
            scripted: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn fail_on(&self, id: Option<u32>) {
        *self.fail_sequence.lock().expect("mock mutex poisoned") = id;
    }

    fn script(&self, reply: &str) {
        self.scripted
            .lock()
            .expect("mock mutex poisoned")
            .push_back(reply.to_string());
    }

    fn calls(&self) -> Vec<(String, GenerationOptions)> {
        self.calls.lock().expect("mock mutex poisoned").clone()
    }

    fn scene_calls(&self) -> Vec<(String, GenerationOptions)> {
        self.calls()
            .into_iter()
            .filter(|(prompt, _)| prompt.contains("Write the FULL script content"))
            .collect()
    }
}

fn sequence_id(prompt: &str) -> Option<u32> {
    let rest = prompt.split("content for SEQUENCE ").nth(1)?;
    rest.split(':').next()?.trim().parse().ok()
}

impl LanguageModel for StudioMock {
    fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LanguageModelError> {
        self.calls
            .lock()
            .expect("mock mutex poisoned")
            .push((prompt.to_string(), options.clone()));

        if let Some(reply) = self.scripted.lock().expect("mock mutex poisoned").pop_front() {
            return Ok(reply);
        }
        if options.wants_json() {
            return Ok(BLUEPRINT_JSON.to_string());
        }
        if let Some(id) = sequence_id(prompt) {
            if *self.fail_sequence.lock().expect("mock mutex poisoned") == Some(id) {
                return Err(LanguageModelError::backend(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "scripted scene failure",
                )));
            }
            return Ok(format!("SCENE-BODY-{id}"));
        }
        Ok("【风格基因提取报告】用仪式掩盖压抑。".to_string())
    }
}

fn to_production(workflow: &mut Workflow, model: &StudioMock, registry: &PromptRegistry, sink: &VecLogSink) {
    workflow.set_style(DirectorStyle::AngLee);
    workflow.extract_style(&StyleService::new(registry, sink), model).unwrap();
    assert_eq!(workflow.stage(), Stage::StyleConfirmed);
    workflow.confirm_style().unwrap();
    workflow.set_outline("赛博朋克城市里的一家修理铺");
    workflow.generate_blueprint(&BlueprintService::new(registry, sink), model).unwrap();
    assert_eq!(workflow.stage(), Stage::BlueprintReview);
    workflow.approve_blueprint().unwrap();
}

#[test]
fn full_session_runs_from_style_to_export() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    workflow.push_character(Character::new("老朱", "父亲", "只会用做饭说话"));

    to_production(&mut workflow, &model, &registry, &sink);
    let ids: Vec<u32> = workflow.chapters().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(workflow.current_chapter(), Some(1));
    assert_eq!(workflow.feasibility(), "用维修仪式替换烹饪仪式。");

    let report = workflow
        .write_all_remaining(&SceneService::new(&registry, &sink), &model, Duration::ZERO)
        .unwrap();
    assert_eq!(report.completed, vec![1, 2, 3]);

    let script = export_script(workflow.chapters());
    assert!(script.contains("=== 第 1 场: 早班 ===\n\nSCENE-BODY-1"));
    assert!(script.contains("=== 第 3 场: 停电 ===\n\nSCENE-BODY-3"));

    let blueprint_prompt = &model.calls()[1].0;
    assert!(blueprint_prompt.contains("- NAME: 老朱 (父亲)"));
    assert!(!blueprint_prompt.contains("- NAME:  ("));
}

#[test]
fn ids_stay_stable_across_production() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);

    let scenes = SceneService::new(&registry, &sink);
    workflow.write_chapter(&scenes, &model, 2).unwrap();
    workflow.edit_chapter(1, "手写的第一场").unwrap();
    let ids: Vec<u32> = workflow.chapters().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(workflow.chapter(2).unwrap().content, "SCENE-BODY-2");
}

#[test]
fn third_scene_sees_both_earlier_scenes() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);

    workflow.edit_chapter(1, "MARKER-A").unwrap();
    workflow.edit_chapter(2, "MARKER-B").unwrap();
    workflow.write_chapter(&SceneService::new(&registry, &sink), &model, 3).unwrap();

    let scene_calls = model.scene_calls();
    let prompt = &scene_calls.last().unwrap().0;
    assert!(prompt.contains("MARKER-A"));
    assert!(prompt.contains("MARKER-B"));
    assert!(!prompt.contains("SCENE-BODY-3"));
}

#[test]
fn short_corpus_never_reaches_the_backend() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    workflow.set_style(DirectorStyle::Custom);
    workflow.set_corpus("太短的语料");

    workflow
        .extract_style(&StyleService::new(&registry, &sink), &model)
        .unwrap();
    assert!(model.calls().is_empty());
    assert_eq!(workflow.stage(), Stage::StyleInput);
    assert_eq!(workflow.error(), Some(INSUFFICIENT_CORPUS_MESSAGE));
}

#[test]
fn empty_refinement_keeps_content() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);
    workflow.edit_chapter(1, "原封不动").unwrap();

    model.script("");
    workflow
        .refine_chapter(&RefineService::new(&registry, &sink), &model, 1, "更慢")
        .unwrap();
    assert_eq!(workflow.chapter(1).unwrap().content, "原封不动");
}

#[test]
fn batch_continues_past_a_failed_scene() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);

    model.fail_on(Some(2));
    let scenes = SceneService::new(&registry, &sink);
    let report = workflow
        .write_all_remaining(&scenes, &model, Duration::from_millis(1))
        .unwrap();
    assert_eq!(report.completed, vec![1, 3]);
    assert_eq!(report.failed, vec![2]);

    let status: Vec<ChapterStatus> = workflow.chapters().iter().map(|c| c.status).collect();
    assert_eq!(
        status,
        vec![ChapterStatus::Completed, ChapterStatus::Error, ChapterStatus::Completed]
    );
    assert_eq!(workflow.chapter(3).unwrap().content, "SCENE-BODY-3");
    assert_eq!(workflow.error(), Some("第 2 场写入失败"));

    // Re-running picks up only the failed scene.
    model.fail_on(None);
    let report = workflow.write_all_remaining(&scenes, &model, Duration::ZERO).unwrap();
    assert_eq!(report.completed, vec![2]);
    assert!(workflow.pending_chapter_ids().is_empty());
}

#[test]
fn reset_from_any_stage_is_idempotent() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();

    let mut fresh = Workflow::new();
    fresh.reset();
    let baseline_stage = fresh.stage();

    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);
    workflow
        .write_chapter(&SceneService::new(&registry, &sink), &model, 1)
        .unwrap();

    workflow.reset();
    assert_eq!(workflow.stage(), baseline_stage);
    assert!(workflow.chapters().is_empty());
    assert!(workflow.style_dna().is_empty());
    assert!(workflow.feasibility().is_empty());

    let after_first = workflow.clone();
    workflow.reset();
    assert_eq!(workflow, after_first);
}

#[test]
fn entropy_is_forwarded_unmodified() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();

    for entropy in [0.2_f32, 0.9, 1.5] {
        let model = StudioMock::new();
        let mut workflow = Workflow::new();
        workflow.set_entropy(entropy).unwrap();
        to_production(&mut workflow, &model, &registry, &sink);
        workflow
            .write_chapter(&SceneService::new(&registry, &sink), &model, 1)
            .unwrap();

        let calls = model.calls();
        assert_eq!(calls[0].1.temperature, None, "style uses the default");
        assert_eq!(calls[1].1.temperature, Some(entropy));
        assert_eq!(calls[2].1.temperature, Some(entropy));
    }
}

#[test]
fn last_writer_wins_between_save_and_refinement() {
    let registry = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let model = StudioMock::new();
    let mut workflow = Workflow::new();
    to_production(&mut workflow, &model, &registry, &sink);
    let refine = RefineService::new(&registry, &sink);

    // Save first, refinement commits after.
    workflow.edit_chapter(1, "手动稿").unwrap();
    model.script("精修稿-1");
    workflow.refine_chapter(&refine, &model, 1, "压低对白").unwrap();
    assert_eq!(workflow.chapter(1).unwrap().content, "精修稿-1");

    // Refinement lands while a draft is open; the later save wins.
    workflow.open_editor(1).unwrap();
    let job = workflow.begin_refine(1, "更多雨").unwrap().unwrap();
    assert_eq!(workflow.complete_refine(&job, Ok("精修稿-2".into())), Commit::Applied);
    assert_eq!(workflow.draft().unwrap().text, "精修稿-2");
    workflow.update_draft("最后的手动稿").unwrap();
    workflow.save_draft().unwrap();
    assert_eq!(workflow.chapter(1).unwrap().content, "最后的手动稿");
}
