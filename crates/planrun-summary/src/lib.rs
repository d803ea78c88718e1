//! Run summary collection.
//!
//! The collector accumulates per-step records and run-level errors during an
//! execution and renders them at the end. Captured output is bounded so a
//! chatty backend cannot balloon memory. Whether collection is on is decided
//! once at construction; a disabled collector is a total no-op and every
//! accessor behaves as if nothing was recorded.

use std::collections::BTreeSet;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ceiling on captured output per step, in characters.
pub const MAX_CAPTURED_OUTPUT_CHARS: usize = 100_000;

/// Environment variable that disables summary collection when set to
/// `1`, `true`, or `yes`.
pub const NO_SUMMARY_ENV: &str = "PLANRUN_NO_SUMMARY";

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub title: String,
    pub executor: String,
    pub success: bool,
    /// Captured backend output, truncated to [`MAX_CAPTURED_OUTPUT_CHARS`].
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Serializable finished-run view handed to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub mode: String,
    pub total_steps: usize,
    /// Failed step records plus run-level errors. A required post-apply
    /// failure after a successful step counts here even though the step
    /// record itself stays successful.
    pub failed_steps: usize,
    pub batch_iterations: u32,
    pub records: Vec<StepRecord>,
    pub errors: Vec<String>,
    pub changed_files: Vec<String>,
}

/// Accumulates step records, run-level errors, and file changes for one run.
#[derive(Debug)]
pub struct SummaryCollector {
    enabled: bool,
    mode: String,
    records: Vec<StepRecord>,
    errors: Vec<String>,
    batch_iterations: u32,
    vcs_baseline: Option<BTreeSet<String>>,
    changed_files: BTreeSet<String>,
}

impl SummaryCollector {
    /// Create a collector for a run.
    ///
    /// `enabled` overrides everything when given; otherwise the
    /// `PLANRUN_NO_SUMMARY` environment variable is consulted, once, here.
    #[must_use]
    pub fn new(mode: impl Into<String>, enabled: Option<bool>) -> Self {
        let enabled = enabled.unwrap_or_else(|| !env_disabled());
        Self {
            enabled,
            mode: mode.into(),
            records: Vec::new(),
            errors: Vec::new(),
            batch_iterations: 0,
            vcs_baseline: None,
            changed_files: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a finished step. Output is truncated to the capture ceiling.
    pub fn record_step(&mut self, mut record: StepRecord) {
        if !self.enabled {
            return;
        }
        record.output = truncate_output(&record.output);
        self.records.push(record);
    }

    /// Record a run-level error that is not attributable to a single step,
    /// e.g. a failed post-apply command.
    pub fn add_error(&mut self, message: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.errors.push(message.into());
    }

    pub fn note_batch_iteration(&mut self) {
        if self.enabled {
            self.batch_iterations += 1;
        }
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Snapshot the dirty files in the workspace before execution starts.
    /// Best-effort: failures are logged and tracking is simply skipped.
    pub async fn capture_vcs_state(&mut self, workspace: &Utf8Path) {
        if !self.enabled {
            return;
        }
        match git_status_paths(workspace).await {
            Ok(paths) => self.vcs_baseline = Some(paths),
            Err(e) => {
                tracing::debug!(workspace = %workspace, error = %e, "Skipping file-change tracking");
            }
        }
    }

    /// Diff current dirty files against the baseline and record new entries.
    pub async fn track_file_changes(&mut self, workspace: &Utf8Path) {
        if !self.enabled {
            return;
        }
        let Some(baseline) = &self.vcs_baseline else {
            return;
        };
        match git_status_paths(workspace).await {
            Ok(current) => {
                for path in current.difference(baseline) {
                    self.changed_files.insert(path.clone());
                }
            }
            Err(e) => {
                tracing::debug!(workspace = %workspace, error = %e, "Failed to diff workspace state");
            }
        }
    }

    /// Finished-run summary, or `None` when collection is disabled.
    #[must_use]
    pub fn execution_summary(&self) -> Option<ExecutionSummary> {
        if !self.enabled {
            return None;
        }
        Some(ExecutionSummary {
            mode: self.mode.clone(),
            total_steps: self.records.len(),
            failed_steps: self.records.iter().filter(|r| !r.success).count() + self.errors.len(),
            batch_iterations: self.batch_iterations,
            records: self.records.clone(),
            errors: self.errors.clone(),
            changed_files: self.changed_files.iter().cloned().collect(),
        })
    }
}

impl ExecutionSummary {
    /// Human-readable rendering printed at the end of a run.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Execution summary ({} mode): {} step(s), {} failed",
            self.mode, self.total_steps, self.failed_steps
        ));
        if self.batch_iterations > 0 {
            out.push_str(&format!(", {} iteration(s)", self.batch_iterations));
        }
        out.push('\n');

        for record in &self.records {
            let mark = if record.success { "ok" } else { "FAILED" };
            out.push_str(&format!(
                "  [{mark}] {} via {} ({}ms)\n",
                record.title, record.executor, record.duration_ms
            ));
            if let Some(err) = &record.error_message {
                out.push_str(&format!("         {err}\n"));
            }
        }

        if !self.errors.is_empty() {
            out.push_str(&format!("Errors ({}):\n", self.errors.len()));
            for err in &self.errors {
                out.push_str(&format!("  - {err}\n"));
            }
        }

        if !self.changed_files.is_empty() {
            out.push_str(&format!("Changed files ({}):\n", self.changed_files.len()));
            for path in &self.changed_files {
                out.push_str(&format!("  {path}\n"));
            }
        }

        out
    }
}

/// Truncate to the capture ceiling at a character boundary, appending a
/// marker that names how much was kept.
#[must_use]
pub fn truncate_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_CAPTURED_OUTPUT_CHARS {
        return output.to_owned();
    }
    let mut kept: String = output.chars().take(MAX_CAPTURED_OUTPUT_CHARS).collect();
    kept.push_str(&format!(
        "\n… truncated (showing first {MAX_CAPTURED_OUTPUT_CHARS} of {total} chars)"
    ));
    kept
}

fn env_disabled() -> bool {
    match std::env::var(NO_SUMMARY_ENV) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => false,
    }
}

/// Paths reported dirty by `git status --porcelain`, relative to the repo
/// root. Any failure (no git, not a repo) is returned as an error string.
async fn git_status_paths(workspace: &Utf8Path) -> Result<BTreeSet<String>, String> {
    let output = tokio::process::Command::new("git")
        .arg("status")
        .arg("--porcelain")
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(format!("git status exited with {}", output.status));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut paths = BTreeSet::new();
    for line in stdout.lines() {
        // Porcelain v1: two status columns, a space, then the path.
        if line.len() > 3 {
            paths.insert(line[3..].trim().to_owned());
        }
    }
    Ok(paths)
}
