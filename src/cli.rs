//! Command-line interface.
//!
//! All commands are handled here; `main.rs` only maps the returned
//! [`ExitCode`]. Handlers return `anyhow::Result` and errors are mapped to
//! the exit-code table by inspecting the underlying error type.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use planrun_engine::{
    EngineError, ExecutionMode, Orchestrator, PostApplyCommand, RunOptions, RunOutcome,
};
use planrun_executor::{ClaudeExecutor, ExecutorError, ExecutorRegistry};
use planrun_lock::LockError;
use planrun_plan::{PlanError, PlanStore};
use planrun_resolver::{NextPlanFilter, find_next_plan, find_next_ready_dependency, is_ready};

use crate::config::{self, CommandEntry, ConfigError};
use crate::exit_codes::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "planrun",
    version,
    about = "Dependency-ordered plan execution via coding-agent backends"
)]
pub struct Cli {
    /// Enable debug-level logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Plan directory (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Serial,
    Batch,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Serial => Self::Serial,
            ModeArg::Batch => Self::Batch,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a plan to completion or terminal failure.
    Run {
        /// Plan id or path to a plan file.
        plan: String,

        #[arg(long, value_enum, default_value = "serial")]
        mode: ModeArg,

        /// Backend name (overrides config `default_executor`).
        #[arg(long)]
        executor: Option<String>,

        /// Ceiling on executor calls; the run stops cleanly when reached.
        #[arg(long, value_name = "N")]
        max_steps: Option<u32>,

        /// Force summary collection on.
        #[arg(long)]
        summary: bool,

        /// Force summary collection off.
        #[arg(long, conflicts_with = "summary")]
        no_summary: bool,

        /// Workspace directory to lock for the duration of the run.
        #[arg(long, value_name = "DIR")]
        workspace: Option<Utf8PathBuf>,
    },

    /// Print the next actionable plan.
    Next {
        /// Consider only pending plans.
        #[arg(long)]
        pending_only: bool,

        /// Consider only in-progress plans.
        #[arg(long, conflicts_with = "pending_only")]
        in_progress_only: bool,
    },

    /// List all plans with status, priority, and readiness.
    List,

    /// Show one plan in detail, including its next ready dependency.
    Show {
        /// Plan id or path to a plan file.
        plan: String,
    },

    /// Inspect or clear the workspace lock.
    Lock {
        #[command(subcommand)]
        action: LockAction,

        /// Workspace directory (defaults to the plan directory).
        #[arg(long, global = true, value_name = "DIR")]
        workspace: Option<Utf8PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum LockAction {
    /// Show the current lock holder, if any.
    Status,
    /// Remove a stale lock.
    Clear,
}

/// Entry point called from `main`. Handles all output; returns the exit
/// code on failure.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    // Double init only happens in tests.
    let _ = crate::logging::init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            eprintln!("error: failed to start runtime: {e}");
            ExitCode::INTERNAL
        })?;

    match runtime.block_on(dispatch(cli)) {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            Err(exit_code_for(&e))
        }
    }
}

/// Map an error chain to the exit-code table.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(plan_err) = cause.downcast_ref::<PlanError>() {
            return plan_exit_code(plan_err);
        }
        if let Some(lock_err) = cause.downcast_ref::<LockError>() {
            return lock_exit_code(lock_err);
        }
        // EngineError wraps its sources transparently, so they never show
        // up as separate links in the chain; match the variants here.
        if let Some(engine_err) = cause.downcast_ref::<EngineError>() {
            return match engine_err {
                EngineError::Plan(e) => plan_exit_code(e),
                EngineError::Lock(e) => lock_exit_code(e),
                EngineError::Executor(_) | EngineError::Io(_) => ExitCode::INTERNAL,
            };
        }
        if matches!(
            cause.downcast_ref::<ExecutorError>(),
            Some(ExecutorError::UnknownExecutor { .. })
        ) {
            return ExitCode::CLI_ARGS;
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCode::CLI_ARGS;
        }
    }
    ExitCode::INTERNAL
}

fn plan_exit_code(err: &PlanError) -> ExitCode {
    match err {
        PlanError::Io(_) => ExitCode::INTERNAL,
        _ => ExitCode::VALIDATION,
    }
}

fn lock_exit_code(err: &LockError) -> ExitCode {
    match err {
        LockError::Held { .. } | LockError::Stale { .. } | LockError::NotStale { .. } => {
            ExitCode::LOCK_HELD
        }
        _ => ExitCode::INTERNAL,
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let plan_dir = match cli.dir {
        Some(dir) => dir,
        None => current_dir()?,
    };

    match cli.command {
        Commands::Run {
            plan,
            mode,
            executor,
            max_steps,
            summary,
            no_summary,
            workspace,
        } => {
            cmd_run(
                &plan_dir, &plan, mode, executor, max_steps, summary, no_summary, workspace,
            )
            .await
        }
        Commands::Next {
            pending_only,
            in_progress_only,
        } => cmd_next(&plan_dir, pending_only, in_progress_only),
        Commands::List => cmd_list(&plan_dir),
        Commands::Show { plan } => cmd_show(&plan_dir, &plan),
        Commands::Lock { action, workspace } => {
            cmd_lock(&plan_dir, action, workspace)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    plan_dir: &Utf8PathBuf,
    plan_arg: &str,
    mode: ModeArg,
    executor: Option<String>,
    max_steps: Option<u32>,
    summary: bool,
    no_summary: bool,
    workspace: Option<Utf8PathBuf>,
) -> Result<ExitCode> {
    let file_config = config::load(plan_dir).context("loading configuration")?;

    let store = PlanStore::new(plan_dir.clone());
    let plan_file = store
        .resolve(plan_arg)
        .with_context(|| format!("resolving plan {plan_arg:?}"))?;

    let executor_name = executor.unwrap_or_else(|| file_config.default_executor().to_owned());
    let registry = build_registry();
    let backend = registry
        .get(&executor_name)
        .context("selecting executor backend")?;

    let summary_enabled = if no_summary {
        Some(false)
    } else if summary {
        Some(true)
    } else {
        file_config.summary.enabled
    };

    let options = RunOptions {
        mode: mode.into(),
        max_steps,
        capture_output: true,
        summary_enabled,
        workspace,
        lock_ttl_secs: file_config.lock_ttl_secs(),
        post_apply: map_commands(&file_config.post_apply),
        on_complete: map_commands(&file_config.on_complete),
    };

    tracing::info!(
        plan_id = plan_file.plan.id,
        executor = %executor_name,
        mode = options.mode.as_str(),
        "Starting run"
    );

    let report = Orchestrator::new(store, backend, options)
        .run(&plan_file.path)
        .await
        .context("executing plan")?;

    if let Some(summary) = &report.summary {
        print!("{}", summary.render());
    }

    match report.outcome {
        RunOutcome::Complete => Ok(ExitCode::SUCCESS),
        RunOutcome::Failed { reason } => {
            eprintln!("run failed: {reason}");
            Ok(ExitCode::EXECUTOR_FAILURE)
        }
    }
}

fn cmd_next(
    plan_dir: &Utf8PathBuf,
    pending_only: bool,
    in_progress_only: bool,
) -> Result<ExitCode> {
    let store = PlanStore::new(plan_dir.clone());
    let collection = store.read_all().context("scanning plan directory")?;

    let filter = NextPlanFilter {
        include_pending: !in_progress_only,
        include_in_progress: !pending_only,
    };

    match find_next_plan(&collection, filter) {
        Some(next) => {
            let priority = next
                .plan
                .priority
                .map(|p| format!(", {p}"))
                .unwrap_or_default();
            println!(
                "Plan {}: {} [{}{}]",
                next.plan.id, next.plan.title, next.plan.status, priority
            );
        }
        None => println!("No ready plan found"),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(plan_dir: &Utf8PathBuf) -> Result<ExitCode> {
    let store = PlanStore::new(plan_dir.clone());
    let collection = store.read_all().context("scanning plan directory")?;

    for (id, paths) in &collection.duplicates {
        let listed: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
        tracing::warn!(id, files = %listed.join(", "), "Duplicate plan id");
    }

    let mut plans: Vec<_> = collection.plans.values().collect();
    plans.sort_by_key(|pf| pf.plan.id);

    println!("{:>5}  {:<12} {:<8} {:<6} TITLE", "ID", "STATUS", "PRIORITY", "READY");
    for pf in plans {
        let priority = pf.plan.priority.map_or("-", |p| p.as_str());
        let ready = if is_ready(&pf.plan, &collection) { "yes" } else { "no" };
        println!(
            "{:>5}  {:<12} {:<8} {:<6} {}",
            pf.plan.id,
            pf.plan.status.as_str(),
            priority,
            ready,
            pf.plan.title
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_show(plan_dir: &Utf8PathBuf, plan_arg: &str) -> Result<ExitCode> {
    let store = PlanStore::new(plan_dir.clone());
    let plan_file = store
        .resolve(plan_arg)
        .with_context(|| format!("resolving plan {plan_arg:?}"))?;
    let plan = &plan_file.plan;

    println!("Plan {}: {}", plan.id, plan.title);
    println!("  file: {}", plan_file.path);
    println!("  status: {}", plan.status);
    if let Some(priority) = plan.priority {
        println!("  priority: {priority}");
    }
    if let Some(goal) = &plan.goal {
        println!("  goal: {goal}");
    }
    if !plan.dependencies.is_empty() {
        let deps: Vec<String> = plan.dependencies.iter().map(u32::to_string).collect();
        println!("  dependencies: {}", deps.join(", "));
    }
    if let Some(parent) = plan.parent {
        println!("  parent: {parent}");
    }
    println!(
        "  tasks: {} total, {} incomplete",
        plan.tasks.len(),
        plan.incomplete_task_count()
    );
    for task in &plan.tasks {
        let mark = if task.is_done() { "x" } else { " " };
        println!("    [{mark}] {}", task.title);
    }

    let collection = store.read_all().context("scanning plan directory")?;
    let search = find_next_ready_dependency(plan.id, &collection);
    match search.plan {
        Some(dep) => println!(
            "  next dependency: {} (plan {}: {})",
            search.message, dep.plan.id, dep.plan.title
        ),
        None => println!("  next dependency: {}", search.message),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_lock(
    plan_dir: &Utf8PathBuf,
    action: LockAction,
    workspace: Option<Utf8PathBuf>,
) -> Result<ExitCode> {
    let workspace = workspace.unwrap_or_else(|| plan_dir.clone());
    let file_config = config::load(plan_dir).context("loading configuration")?;

    match action {
        LockAction::Status => {
            match planrun_lock::read_lock_info(&workspace).context("reading lock")? {
                Some(info) => {
                    println!(
                        "Locked by pid {} ({}) for {}s, planrun {}",
                        info.pid,
                        info.owner,
                        info.age_secs(),
                        info.version
                    );
                }
                None => println!("Not locked"),
            }
            Ok(ExitCode::SUCCESS)
        }
        LockAction::Clear => {
            let cleared = planrun_lock::clear_stale(&workspace, file_config.lock_ttl_secs())
                .context("clearing lock")?;
            if cleared {
                println!("Stale lock removed");
            } else {
                println!("No lock present");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ClaudeExecutor::new()));
    registry
}

fn map_commands(entries: &[CommandEntry]) -> Vec<PostApplyCommand> {
    entries
        .iter()
        .map(|entry| PostApplyCommand {
            title: entry.title.clone(),
            command: entry.command.clone(),
            required: entry.required,
        })
        .collect()
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| anyhow::anyhow!("current directory is not UTF-8: {}", p.display()))
}
