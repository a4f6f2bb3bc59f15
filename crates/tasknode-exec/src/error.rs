use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    /// The child could not be created or its pipes could not be attached.
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log file not found: {0}")]
    LogNotFound(String),

    #[error("invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ExecError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::EmptyCommand => "BAD_REQUEST",
            ExecError::Spawn(_) => "SPAWN_ERROR",
            ExecError::Io(_) => "IO_ERROR",
            ExecError::LogNotFound(_) => "NOT_FOUND",
            ExecError::Pattern(_) => "BAD_REQUEST",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
