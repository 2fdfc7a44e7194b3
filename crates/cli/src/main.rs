use clap::{Args, Parser, Subcommand};
use remix_adapters::{create_llm_adapter, create_llm_adapter_from_profile, AdapterError};
use remix_core::{
    export_file_name, export_script, AccessError, AccessGate, Character, CharacterField, Commit,
    ConfigStore, DirectorStyle, GenerationOptions, LanguageModel, LanguageModelError, LlmConfig,
    LogLevel, LogRecord, LogSink, Phase, PromptError, PromptRegistry, SessionError, SessionStore,
    SharedLogSink, StdoutLogSink, UnknownDirectorStyle, Workflow, WorkflowError,
    RESET_CONFIRMATION,
};
use remix_studio::{Studio, StudioError};
use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink: SharedLogSink = Arc::new(StdoutLogSink::new());

    let mut store = ConfigStore::open(cli.config.clone())?;
    store.ensure_recent_defaults();

    match cli.command {
        Command::Login(args) => run_login(&store, &cli.project, args, &*sink),
        Command::Config(ConfigCommand::TestLlm(args)) => run_test_llm(&mut store, args, &*sink),
        command => {
            let gate = AccessGate::new(&store.config().access, &cli.project);
            if !gate.is_unlocked() {
                return Err(CliError::Locked);
            }

            let session = SessionStore::new(&cli.project);
            let workflow = session.load(&store.config().studio, &*sink)?;
            let context = Context {
                store,
                project: cli.project,
                llm_interface: cli.llm_interface,
                sink,
            };
            let (workflow, outcome) = dispatch(context, workflow, command);
            session.save(&workflow)?;
            outcome
        }
    }
}

struct Context {
    store: ConfigStore,
    project: PathBuf,
    llm_interface: Option<String>,
    sink: SharedLogSink,
}

impl Context {
    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

/// Applies one command to the loaded session. The session is handed back even
/// when the command fails so partial progress is saved.
fn dispatch(mut ctx: Context, mut workflow: Workflow, command: Command) -> (Workflow, Result<(), CliError>) {
    let outcome = match command {
        Command::Status(args) => run_status(&workflow, args),
        Command::Style(command) => match command {
            StyleCommand::Select(args) => run_select_style(&mut workflow, args),
            StyleCommand::Extract => {
                return run_generation(&mut ctx, workflow, |studio| async move {
                    studio.extract_style().await
                })
            }
            StyleCommand::Confirm => workflow.confirm_style().map_err(CliError::from),
            StyleCommand::Relearn => workflow.relearn_style().map_err(CliError::from),
        },
        Command::Characters(command) => run_characters(&mut workflow, command),
        Command::Blueprint(command) => match command {
            BlueprintCommand::Generate(args) => {
                if let Err(err) = apply_blueprint_inputs(&mut workflow, args) {
                    return (workflow, Err(err));
                }
                return run_generation(&mut ctx, workflow, |studio| async move {
                    studio.create_blueprint().await
                });
            }
            BlueprintCommand::Approve => workflow.approve_blueprint().map_err(CliError::from),
            BlueprintCommand::Retry => workflow.retry_blueprint().map_err(CliError::from),
        },
        Command::Scene(command) => match command {
            SceneCommand::Write(args) => {
                let id = args.id;
                return run_generation(&mut ctx, workflow, move |studio| async move {
                    studio.write_chapter(id).await
                });
            }
            SceneCommand::WriteAll => return run_write_all(&mut ctx, workflow),
            SceneCommand::Refine(args) => {
                return run_generation(&mut ctx, workflow, move |studio| async move {
                    studio.refine_chapter(args.id, &args.instruction).await
                })
            }
            SceneCommand::Edit(args) => run_edit_scene(&mut workflow, args),
            SceneCommand::Select(args) => workflow.select_chapter(args.id).map_err(CliError::from),
            SceneCommand::Show(args) => run_show_scene(&workflow, args),
        },
        Command::Export(args) => run_export(&ctx, &workflow, args),
        Command::Reset(args) => {
            if args.yes {
                workflow.reset();
                ctx.log(LogLevel::Info, "会话已重置，大纲与角色表保留。");
                Ok(())
            } else {
                Err(CliError::ResetNotConfirmed)
            }
        }
        Command::Login(_) | Command::Config(_) => Ok(()),
    };
    (workflow, outcome)
}

fn run_login(
    store: &ConfigStore,
    project: &Path,
    args: LoginArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let gate = AccessGate::new(&store.config().access, project);
    if gate.is_open() {
        sink.log(LogRecord::info("未设置访问密码，无需登录。"));
        return Ok(());
    }
    gate.unlock(&args.password)?;
    sink.log(LogRecord::info("✅ 登录成功"));
    Ok(())
}

fn run_test_llm(store: &mut ConfigStore, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let (selected, adapter) = build_model(store, args.interface)?;
    sink.log(LogRecord::info(format!("开始测试 LLM 配置：{selected}")));
    sink.log(LogRecord::info("发送测试提示词: Please reply 'OK'"));

    match adapter.invoke("Please reply 'OK'", &GenerationOptions::new()) {
        Ok(response) if response.trim().is_empty() => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                "❌ LLM配置测试失败：未获取到响应",
            ));
            return Err(CliError::TestFailed(
                "LLM配置测试失败：未获取到响应".to_string(),
            ));
        }
        Ok(response) => {
            sink.log(LogRecord::info("✅ LLM配置测试成功！"));
            sink.log(LogRecord::new(LogLevel::Debug, format!("测试回复: {response}")));
        }
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("❌ LLM配置测试出错: {err}"),
            ));
            return Err(CliError::Model(err));
        }
    }

    if store.config().llm_profiles.contains_key(&selected) {
        store.touch_llm_interface(selected);
        store.save()?;
    }
    Ok(())
}

fn run_status(workflow: &Workflow, args: StatusArgs) -> Result<(), CliError> {
    print!("{}", status_report(workflow, args.verbose));
    Ok(())
}

/// Renders the section of the screen the session is on.
fn status_report(workflow: &Workflow, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "阶段: {}", workflow.stage().label());
    let _ = writeln!(out, "风格: {}", workflow.style().profile().name);

    match workflow.stage().phase() {
        Phase::Style => {
            let _ = writeln!(out, "语料: {} 字", workflow.corpus().chars().count());
            if !workflow.style_dna().is_empty() {
                let _ = writeln!(out, "\n[风格基因]\n{}", workflow.style_dna());
            }
        }
        Phase::Blueprint => {
            let _ = writeln!(out, "熵值: {:.2}", workflow.entropy().value());
            let _ = writeln!(out, "有效角色: {} 位", workflow.valid_characters().len());
            if verbose && !workflow.outline().is_empty() {
                let _ = writeln!(out, "\n[大纲]\n{}", workflow.outline());
            }
            if !workflow.feasibility().is_empty() {
                let _ = writeln!(out, "\n[可行性分析]\n{}", workflow.feasibility());
            }
            if !workflow.chapters().is_empty() {
                let _ = writeln!(out, "\n[蓝图] 共 {} 场", workflow.chapters().len());
                for chapter in workflow.chapters() {
                    let _ = writeln!(out, "  {:>3}. {}", chapter.id, chapter.title);
                }
            }
        }
        Phase::Production => {
            let _ = writeln!(out, "熵值: {:.2}", workflow.entropy().value());
            let _ = writeln!(
                out,
                "\n[分场] 已完成 {}/{}",
                workflow.completed_count(),
                workflow.chapters().len()
            );
            for chapter in workflow.chapters() {
                let marker = if workflow.current_chapter() == Some(chapter.id) {
                    ">"
                } else {
                    " "
                };
                let _ = writeln!(
                    out,
                    "{marker} {:>3}. [{}] {}",
                    chapter.id,
                    chapter.status.label(),
                    chapter.title
                );
                if verbose {
                    let _ = writeln!(out, "       {}", chapter.summary);
                }
            }
            if let Some(draft) = workflow.draft() {
                let _ = writeln!(out, "\n第 {} 场有未保存的草稿", draft.chapter_id);
            }
        }
    }

    if let Some(error) = workflow.error() {
        let _ = writeln!(out, "\n⚠ {error}");
    }
    out
}

fn run_select_style(workflow: &mut Workflow, args: StyleSelectArgs) -> Result<(), CliError> {
    let style: DirectorStyle = args.style.parse()?;
    workflow.set_style(style);
    if let Some(path) = args.corpus_file {
        workflow.set_corpus(read_text(&path)?);
    } else if let Some(corpus) = args.corpus {
        workflow.set_corpus(corpus);
    }
    let profile = style.profile();
    println!("{}：{}", profile.name, profile.description);
    Ok(())
}

fn run_characters(workflow: &mut Workflow, command: CharacterCommand) -> Result<(), CliError> {
    match command {
        CharacterCommand::List => {
            for character in workflow.characters() {
                let marker = if character.is_valid() { " " } else { "?" };
                println!(
                    "{marker} {}  {} ({})  {}",
                    character.id, character.name, character.archetype, character.description
                );
            }
            Ok(())
        }
        CharacterCommand::Add(args) => {
            let character = Character::new(args.name, args.archetype, args.description);
            println!("{}", character.id);
            workflow.push_character(character);
            Ok(())
        }
        CharacterCommand::Update(args) => {
            let updates = [
                (CharacterField::Name, args.name),
                (CharacterField::Archetype, args.archetype),
                (CharacterField::Description, args.description),
            ];
            for (field, value) in updates {
                if let Some(value) = value {
                    workflow.update_character(&args.id, field, value)?;
                }
            }
            Ok(())
        }
        CharacterCommand::Remove(args) => {
            let removed = workflow.remove_character(&args.id)?;
            println!("已移除 {}", removed.name);
            Ok(())
        }
    }
}

fn apply_blueprint_inputs(workflow: &mut Workflow, args: BlueprintGenerateArgs) -> Result<(), CliError> {
    if let Some(path) = args.outline_file {
        workflow.set_outline(read_text(&path)?);
    } else if let Some(outline) = args.outline {
        workflow.set_outline(outline);
    }
    if let Some(entropy) = args.entropy {
        workflow.set_entropy(entropy)?;
    }
    Ok(())
}

fn run_edit_scene(workflow: &mut Workflow, args: SceneEditArgs) -> Result<(), CliError> {
    let content = match (args.file, args.content) {
        (Some(path), _) => read_text(&path)?,
        (None, Some(content)) => content,
        (None, None) => return Err(CliError::MissingContent),
    };
    workflow.edit_chapter(args.id, content)?;
    Ok(())
}

fn run_show_scene(workflow: &Workflow, args: SceneIdArgs) -> Result<(), CliError> {
    let chapter = workflow
        .chapter(args.id)
        .ok_or(WorkflowError::UnknownChapter(args.id))?;
    println!("=== 第 {} 场: {} ===\n", chapter.id, chapter.title);
    if chapter.has_content() {
        println!("{}", chapter.content);
    } else {
        println!("{}", remix_core::UNWRITTEN_PLACEHOLDER);
    }
    Ok(())
}

fn run_export(ctx: &Context, workflow: &Workflow, args: ExportArgs) -> Result<(), CliError> {
    if workflow.chapters().is_empty() {
        return Err(CliError::NothingToExport);
    }
    let path = args.output.unwrap_or_else(|| {
        let today = chrono::Local::now().date_naive();
        ctx.project.join(export_file_name(workflow.style(), today))
    });
    fs::write(&path, export_script(workflow.chapters())).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;
    ctx.log(LogLevel::Info, format!("剧本已导出：{}", path.display()));
    Ok(())
}

fn run_write_all(ctx: &mut Context, workflow: Workflow) -> (Workflow, Result<(), CliError>) {
    run_generation(ctx, workflow, |studio| async move {
        tokio::select! {
            report = studio.write_all_remaining() => {
                let report = report?;
                println!(
                    "完成 {:?}，失败 {:?}，跳过 {:?}",
                    report.completed, report.failed, report.skipped
                );
                Ok(Commit::Applied)
            }
            _ = tokio::signal::ctrl_c() => {
                println!("已中断，正在保存进度……");
                Ok(Commit::Discarded)
            }
        }
    })
}

/// Runs one studio action to completion. The adapter holds a blocking HTTP
/// client, so it is created and dropped outside the runtime.
fn run_generation<F, Fut>(
    ctx: &mut Context,
    workflow: Workflow,
    action: F,
) -> (Workflow, Result<(), CliError>)
where
    F: FnOnce(Studio) -> Fut,
    Fut: Future<Output = Result<Commit, StudioError>>,
{
    let (selected, adapter) = match build_model(&ctx.store, ctx.llm_interface.clone()) {
        Ok(parts) => parts,
        Err(err) => return (workflow, Err(err)),
    };
    let prompts = match PromptRegistry::from_prompt_config(&ctx.store.config().prompts) {
        Ok(prompts) => Arc::new(prompts),
        Err(err) => return (workflow, Err(err.into())),
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(source) => return (workflow, Err(CliError::Runtime(source))),
    };
    ctx.log(LogLevel::Info, format!("使用 LLM 接口：{selected}"));

    let model: Arc<dyn LanguageModel> = Arc::from(adapter);
    let studio = Studio::new(
        workflow,
        model,
        prompts,
        Arc::clone(&ctx.sink),
        ctx.store.config().studio.clone(),
    );
    let result = runtime.block_on(action(studio.clone()));
    // An interrupted batch may leave a request on the blocking pool.
    runtime.shutdown_timeout(Duration::from_secs(1));
    let workflow = studio.snapshot();
    drop(studio);

    let outcome = match result {
        Ok(_) => {
            if let Some(error) = workflow.error() {
                ctx.log(LogLevel::Warn, error.to_string());
            }
            if ctx.store.config().llm_profiles.contains_key(&selected) {
                ctx.store.touch_llm_interface(selected);
                ctx.store.save().map_err(CliError::from)
            } else {
                Ok(())
            }
        }
        Err(err) => Err(err.into()),
    };
    (workflow, outcome)
}

/// Picks the named profile, the last used one, or the first configured. With
/// no profiles at all the default Gemini setup is used with an env-var key.
fn build_model(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<(String, Box<dyn LanguageModel>), CliError> {
    match select_llm_interface(store, preferred)? {
        Some(name) => {
            let adapter = create_llm_adapter(store.config(), &name)?;
            Ok((name, adapter))
        }
        None => {
            let adapter = create_llm_adapter_from_profile(&LlmConfig::default())?;
            Ok(("gemini (default)".to_string(), adapter))
        }
    }
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<Option<String>, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().llm_profiles.contains_key(&name) {
            return Ok(Some(name));
        }
        return Err(CliError::UnknownInterface(name));
    }

    if let Some(name) = store.last_llm_interface() {
        return Ok(Some(name.to_string()));
    }

    Ok(store.config().llm_profiles.keys().next().cloned())
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("配置文件错误: {0}")]
    Config(#[from] remix_core::ConfigError),
    #[error("会话文件错误: {0}")]
    Session(#[from] SessionError),
    #[error("{}", .0.user_message())]
    Access(#[from] AccessError),
    #[error("需要先登录：script-remix login --password <密码>")]
    Locked,
    #[error("{}", .0.user_message())]
    Workflow(#[from] WorkflowError),
    #[error("{}", .0.user_message())]
    Studio(#[from] StudioError),
    #[error("{0}")]
    Style(#[from] UnknownDirectorStyle),
    #[error("未找到名为 `{0}` 的接口配置")]
    UnknownInterface(String),
    #[error("读取文件 `{path}` 失败: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("无法启动异步运行时: {0}")]
    Runtime(io::Error),
    #[error("适配器调用失败: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM 调用失败: {0}")]
    Model(#[from] LanguageModelError),
    #[error("提示词加载失败: {0}")]
    Prompt(#[from] PromptError),
    #[error("请通过 --content 或 --file 提供场次内容")]
    MissingContent,
    #[error("还没有可导出的分场")]
    NothingToExport,
    #[error("{} 请加上 --yes 确认", RESET_CONFIRMATION)]
    ResetNotConfirmed,
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "script-remix",
    version,
    about = "Script Remix 剧本重构命令行工具"
)]
struct Cli {
    /// 指定配置文件路径
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// 项目目录，会话与导出文件存放于此
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// 指定用于生成的 LLM 接口名称，默认为最近使用的接口
    #[arg(long, global = true)]
    llm_interface: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 输入访问密码
    Login(LoginArgs),
    /// 查看当前会话进度
    Status(StatusArgs),
    /// 配置相关操作
    #[command(subcommand)]
    Config(ConfigCommand),
    /// 导演风格学习
    #[command(subcommand)]
    Style(StyleCommand),
    /// 角色表
    #[command(subcommand)]
    Characters(CharacterCommand),
    /// 剧情解构蓝图
    #[command(subcommand)]
    Blueprint(BlueprintCommand),
    /// 分场写作与精修
    #[command(subcommand)]
    Scene(SceneCommand),
    /// 导出完整剧本
    Export(ExportArgs),
    /// 重置会话（保留大纲与角色表）
    Reset(ResetArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 测试当前 LLM 接口配置
    TestLlm(TestLlmArgs),
}

#[derive(Subcommand)]
enum StyleCommand {
    /// 选择导演风格，可附带自定义语料
    Select(StyleSelectArgs),
    /// 提取风格基因
    Extract,
    /// 确认风格，进入剧情输入
    Confirm,
    /// 放弃当前风格基因，重新学习
    Relearn,
}

#[derive(Subcommand)]
enum CharacterCommand {
    /// 列出角色
    List,
    /// 新增角色
    Add(CharacterAddArgs),
    /// 修改角色字段
    Update(CharacterUpdateArgs),
    /// 删除角色
    Remove(CharacterIdArgs),
}

#[derive(Subcommand)]
enum BlueprintCommand {
    /// 生成分场蓝图
    Generate(BlueprintGenerateArgs),
    /// 通过蓝图，进入制作阶段
    Approve,
    /// 放弃蓝图，回到剧情输入
    Retry,
}

#[derive(Subcommand)]
enum SceneCommand {
    /// 写入指定场次
    Write(SceneIdArgs),
    /// 按顺序写入所有未完成的场次
    WriteAll,
    /// 按指令精修指定场次
    Refine(SceneRefineArgs),
    /// 用手工内容替换指定场次
    Edit(SceneEditArgs),
    /// 切换当前场次
    Select(SceneIdArgs),
    /// 显示指定场次内容
    Show(SceneIdArgs),
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct StatusArgs {
    /// 同时显示每场梗概
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Args)]
struct TestLlmArgs {
    /// 指定要测试的接口名称，默认为最近使用的接口
    #[arg(long)]
    interface: Option<String>,
}

#[derive(Args)]
struct StyleSelectArgs {
    /// ANG_LEE、WONG_KAR_WAI、EDWARD_YANG、STEPHEN_CHOW 或 CUSTOM
    style: String,
    /// 参考语料文本
    #[arg(long, value_name = "TEXT", conflicts_with = "corpus_file")]
    corpus: Option<String>,
    /// 参考语料文件
    #[arg(long, value_name = "FILE")]
    corpus_file: Option<PathBuf>,
}

#[derive(Args)]
struct CharacterAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    archetype: String,
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Args)]
struct CharacterUpdateArgs {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    archetype: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct CharacterIdArgs {
    id: String,
}

#[derive(Args)]
struct BlueprintGenerateArgs {
    /// 故事大纲
    #[arg(long, value_name = "TEXT", conflicts_with = "outline_file")]
    outline: Option<String>,
    /// 从文件读取故事大纲
    #[arg(long, value_name = "FILE")]
    outline_file: Option<PathBuf>,
    /// 创意熵值 (0.2 - 1.5)
    #[arg(long)]
    entropy: Option<f32>,
}

#[derive(Args)]
struct SceneIdArgs {
    id: u32,
}

#[derive(Args)]
struct SceneRefineArgs {
    id: u32,
    /// 修改指令
    #[arg(long, short)]
    instruction: String,
}

#[derive(Args)]
struct SceneEditArgs {
    id: u32,
    #[arg(long, value_name = "TEXT", conflicts_with = "file")]
    content: Option<String>,
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// 输出文件，默认写入项目目录
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ResetArgs {
    #[arg(long)]
    yes: bool,
}
