//! Advisory workspace lock.
//!
//! At most one run may execute against a workspace at a time. The lock is a
//! JSON file created with `O_EXCL`, so acquisition is atomic on any
//! filesystem that honors `create_new`. Acquisition is fail-fast: if the
//! file exists the caller gets an error immediately, with enough detail to
//! decide whether to wait or to clear a stale lock. There is no retry or
//! queueing built in.
//!
//! A lock is stale when its owning process is no longer alive or when its
//! age exceeds the TTL. Stale locks are never reclaimed implicitly; the
//! caller must clear them with [`clear_stale`] first.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lock file name, placed directly inside the workspace directory.
pub const LOCK_FILE_NAME: &str = ".planrun.lock";

/// Default age past which a lock is considered stale.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    /// Human-readable holder, e.g. "planrun run 12".
    pub owner: String,
    /// Unix seconds at acquisition.
    pub acquired_at: u64,
    pub version: String,
}

impl LockInfo {
    /// Seconds since acquisition, saturating at zero for clock skew.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.acquired_at)
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "workspace {workspace} is locked by pid {pid} ({owner}, held for {held_for}); \
         wait for it to finish or remove the lock if that process is gone"
    )]
    Held {
        workspace: Utf8PathBuf,
        pid: u32,
        owner: String,
        held_for: String,
    },

    #[error(
        "workspace {workspace} has a stale lock from pid {pid} ({age}); \
         run `planrun lock clear` to remove it"
    )]
    Stale {
        workspace: Utf8PathBuf,
        pid: u32,
        age: String,
    },

    #[error("lock file {path} is corrupted: {reason}")]
    Corrupted { path: Utf8PathBuf, reason: String },

    #[error("lock file {path} is not stale; refusing to clear")]
    NotStale { path: Utf8PathBuf },

    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guard owning the workspace lock. The lock file is removed on drop; call
/// [`WorkspaceLock::release`] to surface removal errors instead.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: Utf8PathBuf,
    info: LockInfo,
    released: bool,
}

impl WorkspaceLock {
    /// Acquire the lock for a workspace, failing fast if it is already held.
    ///
    /// An existing lock from a dead process or older than `ttl_secs` yields
    /// [`LockError::Stale`] rather than being reclaimed, so the operator
    /// stays in control of removing it.
    pub fn acquire(
        workspace: &Utf8Path,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<Self, LockError> {
        let path = lock_path(workspace);
        let info = LockInfo {
            pid: std::process::id(),
            owner: owner.to_owned(),
            acquired_at: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        };

        let payload = serde_json::to_string_pretty(&info)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(payload.as_bytes())?;
                file.sync_all()?;
                tracing::debug!(path = %path, pid = info.pid, "Acquired workspace lock");
                Ok(Self {
                    path,
                    info,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(classify_existing(workspace, ttl_secs))
            }
            Err(e) => Err(LockError::Io(e)),
        }
    }

    #[must_use]
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Remove the lock file, reporting failures the drop path swallows.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Io(e)),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path, error = %e, "Failed to remove lock file on drop");
                }
            }
        }
    }
}

/// Read the current lock info, if any. Used for `lock status` display.
pub fn read_lock_info(workspace: &Utf8Path) -> Result<Option<LockInfo>, LockError> {
    let path = lock_path(workspace);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LockError::Io(e)),
    };
    let info: LockInfo =
        serde_json::from_str(&content).map_err(|e| LockError::Corrupted {
            path,
            reason: e.to_string(),
        })?;
    Ok(Some(info))
}

/// Remove the lock file if it is stale or unreadable.
///
/// Returns `true` if a file was removed, `false` if no lock was present.
/// A live, in-TTL lock is left in place and reported as [`LockError::NotStale`].
pub fn clear_stale(workspace: &Utf8Path, ttl_secs: u64) -> Result<bool, LockError> {
    let path = lock_path(workspace);
    match read_lock_info(workspace) {
        Ok(None) => Ok(false),
        Ok(Some(info)) => {
            if is_stale(&info, ttl_secs) {
                fs::remove_file(&path)?;
                tracing::info!(path = %path, pid = info.pid, "Cleared stale lock");
                Ok(true)
            } else {
                Err(LockError::NotStale { path })
            }
        }
        // An unreadable lock file cannot name a live holder; clear it.
        Err(LockError::Corrupted { .. }) => {
            fs::remove_file(&path)?;
            tracing::warn!(path = %path, "Cleared corrupted lock file");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Path of the lock file for a workspace.
#[must_use]
pub fn lock_path(workspace: &Utf8Path) -> Utf8PathBuf {
    workspace.join(LOCK_FILE_NAME)
}

fn classify_existing(workspace: &Utf8Path, ttl_secs: u64) -> LockError {
    let info = match read_lock_info(workspace) {
        Ok(Some(info)) => info,
        Ok(None) => {
            // Raced with a release between create_new and here. Report as
            // held so the caller simply retries the whole operation.
            return LockError::Held {
                workspace: workspace.to_owned(),
                pid: 0,
                owner: "unknown".to_owned(),
                held_for: "0s".to_owned(),
            };
        }
        Err(e) => return e,
    };

    if is_stale(&info, ttl_secs) {
        LockError::Stale {
            workspace: workspace.to_owned(),
            pid: info.pid,
            age: format_duration(info.age_secs()),
        }
    } else {
        LockError::Held {
            workspace: workspace.to_owned(),
            pid: info.pid,
            owner: info.owner.clone(),
            held_for: format_duration(info.age_secs()),
        }
    }
}

fn is_stale(info: &LockInfo, ttl_secs: u64) -> bool {
    !is_process_running(info.pid) || info.age_secs() > ttl_secs
}

/// Liveness probe via `kill(pid, 0)`. EPERM means the process exists but
/// belongs to another user, which still counts as alive.
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a liveness probe, assume the holder is alive and let the TTL
/// decide staleness.
#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
