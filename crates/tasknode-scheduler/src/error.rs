use tasknode_core::types::JobId;
use tasknode_cron::CronError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression failed to parse or never fires.
    #[error("Invalid expression: {0}")]
    InvalidExpression(#[from] CronError),

    /// The job has no live descriptor.
    #[error("Job not armed: {id}")]
    NotArmed { id: JobId },

    /// A disarm or a newer arm happened while the dispatched run was in flight.
    #[error("Re-arm superseded for job {id}")]
    Superseded { id: JobId },

    /// The caller's persistence hook failed; the heap change was rolled back.
    #[error("Persist failed: {0}")]
    Persist(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidExpression(_) => "INVALID_EXPRESSION",
            SchedulerError::NotArmed { .. } => "NOT_ARMED",
            SchedulerError::Superseded { .. } => "SUPERSEDED",
            SchedulerError::Persist(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
