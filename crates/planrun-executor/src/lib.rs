//! Coding-agent execution backends.
//!
//! An [`Executor`] takes prepared prompt content plus plan metadata and runs
//! it through some agent, returning the agent's verdict and output. Backends
//! are looked up by name in an [`ExecutorRegistry`] built once at startup;
//! nothing in the engine hardcodes a particular agent.

mod claude;
mod command_spec;
mod error;
mod registry;

pub use claude::ClaudeExecutor;
pub use command_spec::CommandSpec;
pub use error::ExecutorError;
pub use registry::ExecutorRegistry;

use async_trait::async_trait;
use camino::Utf8PathBuf;

/// Context handed to a backend alongside the prompt content.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub plan_id: u32,
    pub plan_title: String,
    pub plan_file_path: Utf8PathBuf,
    /// "serial" or "batch"; backends may tune prompts per mode.
    pub execution_mode: String,
    /// When false the backend may discard output instead of buffering it.
    pub capture_output: bool,
}

/// Structured failure report a backend can attach to an unsuccessful run.
#[derive(Debug, Clone, Default)]
pub struct FailureDetails {
    pub source_agent: String,
    pub problems: Vec<String>,
    pub requirements: Vec<String>,
    pub solutions: Vec<String>,
}

/// What a backend produced.
///
/// `success` is the backend's own verdict: `Some(false)` marks an explicit
/// failure, while `None` means the backend could not judge and the caller
/// treats the run as successful.
#[derive(Debug, Clone)]
pub struct ExecutorOutput {
    pub success: Option<bool>,
    pub content: String,
    pub failure_details: Option<FailureDetails>,
}

impl ExecutorOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.success.unwrap_or(true)
    }
}

/// A pluggable coding-agent backend.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Registry name, e.g. "claude".
    fn name(&self) -> &str;

    /// Run the prepared content through the agent. Returns `Err` only for
    /// infrastructure failures (spawn errors, missing binary); an agent that
    /// ran and reported failure comes back as `Ok` with `success: Some(false)`.
    async fn execute(
        &self,
        content: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<ExecutorOutput, ExecutorError>;
}
