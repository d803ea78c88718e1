use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unknown executor {name:?}; available: {}", available.join(", "))]
    UnknownExecutor { name: String, available: Vec<String> },

    #[error("executor binary {program:?} not found on PATH")]
    BinaryNotFound { program: String },

    #[error("failed to spawn {program:?}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("executor io error: {0}")]
    Io(#[from] std::io::Error),
}
