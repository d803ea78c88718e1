use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::command_spec::CommandSpec;
use crate::error::ExecutorError;
use crate::{ExecutionMetadata, Executor, ExecutorOutput, FailureDetails};

/// Lines of stderr kept in the failure report.
const STDERR_TAIL_LINES: usize = 20;

/// Backend that drives the `claude` CLI in non-interactive print mode.
///
/// The prompt goes in on stdin so its size never hits argv limits. The
/// binary is resolved on first use, not at registry construction, so a
/// machine without the CLI can still run other backends.
#[derive(Debug, Default)]
pub struct ClaudeExecutor {
    binary_override: Option<PathBuf>,
}

impl ClaudeExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at a specific binary instead of searching PATH.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary_override: Some(binary.into()),
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf, ExecutorError> {
        if let Some(path) = &self.binary_override {
            return Ok(path.clone());
        }
        which::which("claude").map_err(|_| ExecutorError::BinaryNotFound {
            program: "claude".to_owned(),
        })
    }
}

#[async_trait]
impl Executor for ClaudeExecutor {
    fn name(&self) -> &str {
        "claude"
    }

    async fn execute(
        &self,
        content: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let binary = self.resolve_binary()?;
        let spec = CommandSpec::new(&binary)
            .arg("--print")
            .arg("--output-format")
            .arg("text");

        tracing::debug!(
            plan_id = metadata.plan_id,
            command = %spec.display(),
            "Spawning claude backend"
        );

        let mut child = spec
            .to_tokio_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed {
                program: binary.to_string_lossy().into_owned(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A backend that exits before reading all of stdin closes the
            // pipe; that is its prerogative, not an error here.
            match stdin.write_all(content.as_bytes()).await {
                Ok(()) => {
                    let _ = stdin.shutdown().await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ExecutorError::Io(e)),
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            Ok(ExecutorOutput {
                success: Some(true),
                content: if metadata.capture_output {
                    stdout
                } else {
                    String::new()
                },
                failure_details: None,
            })
        } else {
            let problems: Vec<String> = stderr
                .lines()
                .rev()
                .take(STDERR_TAIL_LINES)
                .map(str::to_owned)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            tracing::warn!(
                plan_id = metadata.plan_id,
                status = %output.status,
                "Claude backend exited unsuccessfully"
            );
            Ok(ExecutorOutput {
                success: Some(false),
                content: stdout,
                failure_details: Some(FailureDetails {
                    source_agent: "claude".to_owned(),
                    problems,
                    requirements: Vec::new(),
                    solutions: Vec::new(),
                }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn metadata() -> ExecutionMetadata {
        ExecutionMetadata {
            plan_id: 1,
            plan_title: "test".into(),
            plan_file_path: Utf8PathBuf::from("1.plan.yaml"),
            execution_mode: "serial".into(),
            capture_output: true,
        }
    }

    #[tokio::test]
    async fn missing_binary_is_an_infrastructure_error() {
        let executor = ClaudeExecutor::with_binary("/nonexistent/claude-cli");
        let err = executor.execute("prompt", &metadata()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_reports_failure_not_error() {
        // `false` ignores stdin and exits 1, standing in for an agent that
        // ran but failed.
        let executor = ClaudeExecutor::with_binary("/bin/false");
        let output = executor.execute("prompt", &metadata()).await.unwrap();
        assert_eq!(output.success, Some(false));
        assert!(output.failure_details.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_process_reports_success() {
        // `true` swallows the flags and stdin and exits 0.
        let executor = ClaudeExecutor::with_binary("/bin/true");
        let output = executor.execute("prompt", &metadata()).await.unwrap();
        assert_eq!(output.success, Some(true));
        assert!(output.failure_details.is_none());
    }
}
