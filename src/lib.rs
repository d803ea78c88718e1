//! planrun - dependency-ordered plan execution via coding-agent backends
//!
//! planrun reads plans (YAML files describing dependent units of work),
//! picks the next actionable one, and drives it to completion by handing
//! each task or step to a pluggable execution backend such as the Claude
//! CLI. Runs are serialized per workspace with an advisory file lock and
//! summarized at the end.
//!
//! The crate is usable two ways:
//! - **CLI**: the `planrun` binary (`run`, `next`, `list`, `show`, `lock`).
//! - **Library**: the member crates re-exported here, for embedding the
//!   orchestrator with a custom executor.

pub mod cli;
pub mod config;
pub mod exit_codes;
pub mod logging;

pub use exit_codes::ExitCode;

pub use planrun_engine::{
    DefaultPromptBuilder, EngineError, ExecutionMode, IterationOutcome, Orchestrator,
    PostApplyCommand, PromptBuilder, RunOptions, RunOutcome, RunReport, StubPreparer,
};
pub use planrun_executor::{
    ClaudeExecutor, CommandSpec, ExecutionMetadata, Executor, ExecutorError, ExecutorOutput,
    ExecutorRegistry, FailureDetails,
};
pub use planrun_lock::{LockError, LockInfo, WorkspaceLock};
pub use planrun_plan::{
    Plan, PlanCollection, PlanError, PlanFile, PlanStatus, PlanStore, Priority, Step, Task,
};
pub use planrun_resolver::{
    DependencySearch, NextPlanFilter, find_next_plan, find_next_ready_dependency, is_ready,
};
pub use planrun_summary::{ExecutionSummary, StepRecord, SummaryCollector};
