use thiserror::Error;

use crate::frames::ErrorShape;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },

    #[error("call timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("call cancelled")]
    Cancelled,

    /// The connection went away before a reply arrived.
    #[error("connection closed")]
    Closed,

    /// The peer handled the call and answered with an error.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    pub fn code(&self) -> &str {
        match self {
            RpcError::Dial { .. } => "DIAL_ERROR",
            RpcError::Timeout { .. } => "TIMEOUT",
            RpcError::Cancelled => "CANCELLED",
            RpcError::Closed => "CONNECTION_CLOSED",
            RpcError::Remote { code, .. } => code,
            RpcError::Codec(_) => "CODEC_ERROR",
            RpcError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<ErrorShape> for RpcError {
    fn from(shape: ErrorShape) -> Self {
        RpcError::Remote {
            code: shape.code,
            message: shape.message,
        }
    }
}

impl From<bincode::error::EncodeError> for RpcError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RpcError::Codec(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for RpcError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RpcError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
