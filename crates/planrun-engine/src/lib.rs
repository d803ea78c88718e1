//! Execution orchestration.
//!
//! One [`Orchestrator::run`] drives one plan to `done` or to a terminal
//! failure. The plan file is re-read at every iteration so edits made by the
//! executing backend are observed; `done` flags only ever move forward, and
//! a failed run never reverts status, so partial progress survives.

mod error;
mod prompt;

pub use error::EngineError;
pub use prompt::{DefaultPromptBuilder, PromptBuilder};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;

use planrun_executor::{CommandSpec, ExecutionMetadata, Executor, ExecutorOutput};
use planrun_lock::WorkspaceLock;
use planrun_plan::{Plan, PlanStatus, PlanStore};
use planrun_summary::{ExecutionSummary, StepRecord, SummaryCollector};

/// How the run walks the plan's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One task or step per executor call, in document order.
    #[default]
    Serial,
    /// All incomplete tasks per executor call; the backend edits the plan.
    Batch,
}

impl ExecutionMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Batch => "batch",
        }
    }
}

/// One configured command run after each successful executor call.
#[derive(Debug, Clone)]
pub struct PostApplyCommand {
    pub title: Option<String>,
    /// Argv: program followed by discrete arguments. Never a shell string.
    pub command: Vec<String>,
    pub required: bool,
}

impl PostApplyCommand {
    fn label(&self) -> &str {
        if let Some(title) = &self.title {
            return title;
        }
        self.command.first().map_or("<empty>", String::as_str)
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: ExecutionMode,
    /// Ceiling on executor calls (serial steps or batch iterations).
    /// Reaching it ends the run as complete-so-far; the plan keeps its
    /// real status.
    pub max_steps: Option<u32>,
    pub capture_output: bool,
    /// `None` defers to the `PLANRUN_NO_SUMMARY` environment toggle.
    pub summary_enabled: Option<bool>,
    /// When set, the run takes the workspace lock and tracks file changes.
    pub workspace: Option<Utf8PathBuf>,
    pub lock_ttl_secs: u64,
    pub post_apply: Vec<PostApplyCommand>,
    /// Best-effort hooks run once when the plan reaches `done`.
    pub on_complete: Vec<PostApplyCommand>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Serial,
            max_steps: None,
            capture_output: true,
            summary_enabled: None,
            workspace: None,
            lock_ttl_secs: planrun_lock::DEFAULT_TTL_SECS,
            post_apply: Vec::new(),
            on_complete: Vec::new(),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Continue,
    Complete,
    Failed(String),
}

/// Terminal state of a run. Maps to the process exit code at the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Failed { reason: String },
}

impl RunOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// What a run hands back to the CLI: the outcome plus the summary snapshot
/// (present only when collection was enabled).
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: Option<ExecutionSummary>,
}

/// Seam for materializing tasks into a zero-task stub plan before running.
#[async_trait]
pub trait StubPreparer: Send + Sync {
    async fn prepare(&self, plan_path: &Utf8Path, plan: &Plan) -> Result<(), EngineError>;
}

/// Drives one plan through an executor until done or failed.
pub struct Orchestrator {
    store: PlanStore,
    executor: Arc<dyn Executor>,
    prompt_builder: Arc<dyn PromptBuilder>,
    stub_preparer: Option<Arc<dyn StubPreparer>>,
    options: RunOptions,
}

impl Orchestrator {
    #[must_use]
    pub fn new(store: PlanStore, executor: Arc<dyn Executor>, options: RunOptions) -> Self {
        Self {
            store,
            executor,
            prompt_builder: Arc::new(DefaultPromptBuilder),
            stub_preparer: None,
            options,
        }
    }

    #[must_use]
    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    #[must_use]
    pub fn with_stub_preparer(mut self, preparer: Arc<dyn StubPreparer>) -> Self {
        self.stub_preparer = Some(preparer);
        self
    }

    /// Run the plan at `plan_path` to completion or terminal failure.
    ///
    /// Errors are infrastructure only (lock, store, io); an executor that
    /// ran and failed comes back as `Ok` with a `Failed` outcome.
    pub async fn run(&self, plan_path: &Utf8Path) -> Result<RunReport, EngineError> {
        let _lock = match &self.options.workspace {
            Some(ws) => Some(WorkspaceLock::acquire(
                ws,
                &format!("planrun {}", self.options.mode.as_str()),
                self.options.lock_ttl_secs,
            )?),
            None => None,
        };

        let mut summary =
            SummaryCollector::new(self.options.mode.as_str(), self.options.summary_enabled);
        if let Some(ws) = &self.options.workspace {
            summary.capture_vcs_state(ws).await;
        }

        let outcome = match self.options.mode {
            ExecutionMode::Serial => self.run_serial(plan_path, &mut summary).await?,
            ExecutionMode::Batch => self.run_batch(plan_path, &mut summary).await?,
        };

        if let Some(ws) = &self.options.workspace {
            summary.track_file_changes(ws).await;
        }

        if let RunOutcome::Failed { reason } = &outcome {
            tracing::error!(plan = %plan_path, reason = %reason, "Run failed");
        }

        Ok(RunReport {
            outcome,
            summary: summary.execution_summary(),
        })
    }

    async fn run_serial(
        &self,
        path: &Utf8Path,
        summary: &mut SummaryCollector,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(reason) = self.ensure_prepared(path).await? {
            return Ok(RunOutcome::Failed { reason });
        }

        let mut executed: u32 = 0;
        loop {
            if let Some(max) = self.options.max_steps {
                if executed >= max {
                    tracing::info!(max_steps = max, "Step ceiling reached, stopping");
                    return Ok(RunOutcome::Complete);
                }
            }

            match self.serial_iteration(path, summary).await? {
                IterationOutcome::Continue => executed += 1,
                IterationOutcome::Complete => return Ok(RunOutcome::Complete),
                IterationOutcome::Failed(reason) => return Ok(RunOutcome::Failed { reason }),
            }
        }
    }

    /// One serial pass: select the next item, execute it, run post-apply
    /// commands, and persist the done flag.
    async fn serial_iteration(
        &self,
        path: &Utf8Path,
        summary: &mut SummaryCollector,
    ) -> Result<IterationOutcome, EngineError> {
        let mut plan = self.store.read_plan_file(path)?;
        self.mark_in_progress(path, &mut plan)?;

        let Some((task_idx, step_idx)) = select_next_item(&plan) else {
            self.finish_plan(path, &mut plan).await?;
            return Ok(IterationOutcome::Complete);
        };

        let item_title = match step_idx {
            Some(idx) => format!("{} / step {}", plan.tasks[task_idx].title, idx + 1),
            None => plan.tasks[task_idx].title.clone(),
        };
        tracing::info!(plan_id = plan.id, item = %item_title, "Executing item");

        let prompt = self.prompt_builder.build_item_prompt(&plan, task_idx, step_idx);
        let (record, failure) = self.execute_once(&plan, path, &item_title, &prompt).await;
        summary.record_step(record);
        if let Some(reason) = failure {
            return Ok(IterationOutcome::Failed(reason));
        }

        if let Some(reason) = self.run_post_apply(summary).await {
            return Ok(IterationOutcome::Failed(reason));
        }

        // The backend may have edited the plan file while executing; set the
        // done flag on a fresh read so those edits survive the write-back.
        let mut plan = self.store.read_plan_file(path)?;
        if let Some(task) = plan.tasks.get_mut(task_idx) {
            match step_idx {
                Some(idx) => {
                    if let Some(step) = task.steps.get_mut(idx) {
                        step.done = true;
                    }
                }
                None => task.done = true,
            }
        }
        plan.touch();
        self.store.write_plan_file(path, &plan)?;

        if plan.is_complete() {
            self.finish_plan(path, &mut plan).await?;
            return Ok(IterationOutcome::Complete);
        }
        Ok(IterationOutcome::Continue)
    }

    async fn run_batch(
        &self,
        path: &Utf8Path,
        summary: &mut SummaryCollector,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(reason) = self.ensure_prepared(path).await? {
            return Ok(RunOutcome::Failed { reason });
        }

        let mut iterations: u32 = 0;
        loop {
            if let Some(max) = self.options.max_steps {
                if iterations >= max {
                    tracing::info!(max_steps = max, "Iteration ceiling reached, stopping");
                    return Ok(RunOutcome::Complete);
                }
            }
            iterations += 1;

            match self.batch_iteration(path, iterations, summary).await? {
                IterationOutcome::Continue => {}
                IterationOutcome::Complete => return Ok(RunOutcome::Complete),
                IterationOutcome::Failed(reason) => return Ok(RunOutcome::Failed { reason }),
            }
        }
    }

    /// One batch pass: hand every incomplete task to the backend, then
    /// re-read the plan to see what it accomplished.
    async fn batch_iteration(
        &self,
        path: &Utf8Path,
        iteration: u32,
        summary: &mut SummaryCollector,
    ) -> Result<IterationOutcome, EngineError> {
        let mut plan = self.store.read_plan_file(path)?;
        self.mark_in_progress(path, &mut plan)?;

        let incomplete_before = plan.incomplete_task_count();
        if incomplete_before == 0 {
            self.finish_plan(path, &mut plan).await?;
            return Ok(IterationOutcome::Complete);
        }

        summary.note_batch_iteration();
        tracing::info!(
            plan_id = plan.id,
            iteration,
            incomplete = incomplete_before,
            "Batch iteration"
        );

        let prompt = self.prompt_builder.build_batch_prompt(&plan);
        let title = format!("batch iteration {iteration}");
        let (record, failure) = self.execute_once(&plan, path, &title, &prompt).await;
        summary.record_step(record);
        if let Some(reason) = failure {
            return Ok(IterationOutcome::Failed(reason));
        }

        if let Some(reason) = self.run_post_apply(summary).await {
            return Ok(IterationOutcome::Failed(reason));
        }

        // The backend edits the plan file; pick up what it did.
        let mut plan = self.store.read_plan_file(path)?;
        let incomplete_after = plan.incomplete_task_count();
        if incomplete_after == 0 {
            self.finish_plan(path, &mut plan).await?;
            return Ok(IterationOutcome::Complete);
        }
        if incomplete_after >= incomplete_before {
            return Ok(IterationOutcome::Failed(format!(
                "no progress: {incomplete_after} task(s) still incomplete after iteration {iteration}"
            )));
        }
        Ok(IterationOutcome::Continue)
    }

    /// `Some(reason)` means the run cannot start.
    async fn ensure_prepared(&self, path: &Utf8Path) -> Result<Option<String>, EngineError> {
        let plan = self.store.read_plan_file(path)?;
        if !plan.tasks.is_empty() {
            return Ok(None);
        }
        if let Some(preparer) = &self.stub_preparer {
            preparer.prepare(path, &plan).await?;
            let reloaded = self.store.read_plan_file(path)?;
            if !reloaded.tasks.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(format!(
            "plan {} is a stub with no tasks; prepare it before running",
            plan.id
        )))
    }

    fn mark_in_progress(&self, path: &Utf8Path, plan: &mut Plan) -> Result<(), EngineError> {
        if plan.status != PlanStatus::Pending {
            return Ok(());
        }
        plan.status = PlanStatus::InProgress;
        plan.touch();
        self.store.write_plan_file(path, plan)?;
        tracing::debug!(plan_id = plan.id, "Plan moved to in_progress");

        if let Some(parent_id) = plan.parent {
            self.cascade_parent_in_progress(parent_id);
        }
        Ok(())
    }

    /// Parent follows the child into in_progress. Best-effort: a missing or
    /// unwritable parent only warns.
    fn cascade_parent_in_progress(&self, parent_id: u32) {
        let collection = match self.store.read_all() {
            Ok(collection) => collection,
            Err(e) => {
                tracing::warn!(parent_id, error = %e, "Could not scan plans for parent cascade");
                return;
            }
        };
        let Some(parent) = collection.get(parent_id) else {
            tracing::warn!(parent_id, "Parent plan not found for cascade");
            return;
        };
        if parent.plan.status != PlanStatus::Pending {
            return;
        }
        let mut updated = parent.plan.clone();
        updated.status = PlanStatus::InProgress;
        updated.touch();
        if let Err(e) = self.store.write_plan_file(&parent.path, &updated) {
            tracing::warn!(parent_id, error = %e, "Failed to cascade in_progress to parent");
        }
    }

    /// One executor call, timed and turned into a step record. A returned
    /// error is a failure like any other, with the error text as the reason.
    async fn execute_once(
        &self,
        plan: &Plan,
        path: &Utf8Path,
        title: &str,
        prompt: &str,
    ) -> (StepRecord, Option<String>) {
        let metadata = ExecutionMetadata {
            plan_id: plan.id,
            plan_title: plan.title.clone(),
            plan_file_path: path.to_owned(),
            execution_mode: self.options.mode.as_str().to_owned(),
            capture_output: self.options.capture_output,
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        let result = self.executor.execute(prompt, &metadata).await;
        let ended_at = Utc::now();
        let duration_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (success, output, failure) = match result {
            Ok(output) if output.succeeded() => (true, output.content, None),
            Ok(output) => {
                let reason = render_failure(&output);
                (false, output.content, Some(reason))
            }
            Err(e) => {
                let reason = format!("executor {} failed: {e}", self.executor.name());
                (false, String::new(), Some(reason))
            }
        };

        let record = StepRecord {
            title: title.to_owned(),
            executor: self.executor.name().to_owned(),
            success,
            output,
            error_message: failure.clone(),
            started_at,
            ended_at,
            duration_ms,
        };
        (record, failure)
    }

    /// `Some(reason)` aborts the run (a required command failed). Every
    /// failure, required or not, lands in the run-level summary errors.
    async fn run_post_apply(&self, summary: &mut SummaryCollector) -> Option<String> {
        for cmd in &self.options.post_apply {
            match run_command(cmd, self.options.workspace.as_deref()).await {
                Ok(()) => {}
                Err(reason) => {
                    summary.add_error(format!("post-apply {} failed: {reason}", cmd.label()));
                    if cmd.required {
                        return Some(format!(
                            "required post-apply command {} failed: {reason}",
                            cmd.label()
                        ));
                    }
                    tracing::warn!(
                        command = cmd.label(),
                        reason = %reason,
                        "Non-required post-apply command failed"
                    );
                }
            }
        }
        None
    }

    async fn finish_plan(&self, path: &Utf8Path, plan: &mut Plan) -> Result<(), EngineError> {
        if plan.status != PlanStatus::Done {
            plan.status = PlanStatus::Done;
            plan.touch();
            self.store.write_plan_file(path, plan)?;
            tracing::info!(plan_id = plan.id, "Plan complete");
        }

        for hook in &self.options.on_complete {
            if let Err(reason) = run_command(hook, self.options.workspace.as_deref()).await {
                tracing::warn!(hook = hook.label(), reason = %reason, "Completion hook failed");
            }
        }

        Ok(())
    }
}

/// First actionable item in document order: an undone stepless task, or the
/// first undone step of the first undone task.
fn select_next_item(plan: &Plan) -> Option<(usize, Option<usize>)> {
    for (task_idx, task) in plan.tasks.iter().enumerate() {
        if task.is_done() {
            continue;
        }
        if task.steps.is_empty() {
            return Some((task_idx, None));
        }
        if let Some(step_idx) = task.steps.iter().position(|s| !s.done) {
            return Some((task_idx, Some(step_idx)));
        }
    }
    None
}

fn render_failure(output: &ExecutorOutput) -> String {
    let Some(details) = &output.failure_details else {
        return "executor reported failure".to_owned();
    };
    if details.problems.is_empty() {
        format!("{} reported failure", details.source_agent)
    } else {
        format!(
            "{} reported failure: {}",
            details.source_agent,
            details.problems.join("; ")
        )
    }
}

async fn run_command(cmd: &PostApplyCommand, cwd: Option<&Utf8Path>) -> Result<(), String> {
    let Some((program, args)) = cmd.command.split_first() else {
        return Err("empty command".to_owned());
    };
    let mut spec = CommandSpec::new(program).args(args.iter().cloned());
    if let Some(cwd) = cwd {
        spec = spec.cwd(cwd.as_std_path());
    }

    let output = spec
        .to_tokio_command()
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim();
        if tail.is_empty() {
            Err(format!("exited with {}", output.status))
        } else {
            Err(format!("exited with {} ({tail})", output.status))
        }
    }
}
