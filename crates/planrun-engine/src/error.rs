use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Plan(#[from] planrun_plan::PlanError),

    #[error(transparent)]
    Lock(#[from] planrun_lock::LockError),

    #[error(transparent)]
    Executor(#[from] planrun_executor::ExecutorError),

    #[error("engine io error: {0}")]
    Io(#[from] std::io::Error),
}
