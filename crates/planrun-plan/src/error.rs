use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors from plan parsing, resolution, and persistence.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Malformed plan file '{path}': {reason}")]
    Malformed { path: Utf8PathBuf, reason: String },

    #[error("Duplicate plan id {id} in files: {}", paths.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "))]
    DuplicateId { id: u32, paths: Vec<Utf8PathBuf> },

    #[error("Plan not found: {ident}")]
    NotFound { ident: String },

    #[error("Failed to write plan file '{path}': {reason}")]
    WriteFailed { path: Utf8PathBuf, reason: String },

    #[error("IO error during plan operation: {0}")]
    Io(#[from] std::io::Error),
}
