//! Configuration discovery and precedence.
//!
//! Configuration lives in `<dir>/.planrun/config.toml`, discovered upward
//! from the plan directory. Precedence is CLI flags over file values over
//! built-in defaults; the file is optional and an absent file is not an
//! error, but a file that exists and fails to parse is.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

/// Relative path of the config file within a config root.
pub const CONFIG_RELATIVE_PATH: &str = ".planrun/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: Utf8PathBuf, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: Utf8PathBuf, reason: String },
}

/// One post-apply or completion-hook command as written in TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEntry {
    pub title: Option<String>,
    /// Argv: program followed by discrete arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarySection {
    pub enabled: Option<bool>,
}

/// File-level configuration. Every field is optional; defaults apply when
/// the file or field is absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub default_executor: Option<String>,
    pub lock_ttl_secs: Option<u64>,
    #[serde(default)]
    pub post_apply: Vec<CommandEntry>,
    #[serde(default)]
    pub on_complete: Vec<CommandEntry>,
    #[serde(default)]
    pub summary: SummarySection,
}

impl FileConfig {
    #[must_use]
    pub fn default_executor(&self) -> &str {
        self.default_executor.as_deref().unwrap_or("claude")
    }

    #[must_use]
    pub fn lock_ttl_secs(&self) -> u64 {
        self.lock_ttl_secs
            .unwrap_or(planrun_lock::DEFAULT_TTL_SECS)
    }
}

/// Load configuration by walking upward from `start` until a
/// `.planrun/config.toml` is found. No file anywhere → defaults.
pub fn load(start: &Utf8Path) -> Result<FileConfig, ConfigError> {
    match discover(start) {
        Some(path) => load_file(&path),
        None => Ok(FileConfig::default()),
    }
}

/// Nearest config file at or above `start`, if any.
#[must_use]
pub fn discover(start: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(CONFIG_RELATIVE_PATH);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

fn load_file(path: &Utf8Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}
