use tasknode_core::CoreError;
use tasknode_cron::CronError;
use tasknode_exec::ExecError;
use tasknode_rpc::{frames::codes, ErrorShape, RpcError};
use tasknode_scheduler::SchedulerError;
use tasknode_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the agent's supervisors and RPC services.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid expression: {0}")]
    Cron(#[from] CronError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Wire error code sent back to the control plane.
    pub fn code(&self) -> &str {
        match self {
            AgentError::Store(e) => e.code(),
            AgentError::Scheduler(e) => e.code(),
            AgentError::Cron(_) => "INVALID_EXPRESSION",
            AgentError::Exec(e) => e.code(),
            AgentError::Rpc(e) => e.code(),
            AgentError::Core(e) => e.code(),
            AgentError::BadRequest(_) => codes::BAD_REQUEST,
            AgentError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<AgentError> for ErrorShape {
    fn from(e: AgentError) -> Self {
        ErrorShape::new(e.code(), e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
