use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Wire error codes shared by every service.
pub mod codes {
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// One length-delimited message on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request(ReqFrame),
    Response(ResFrame),
}

/// Caller → peer. `id` is unique per connection and echoed in the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReqFrame {
    pub id: u64,
    /// `"Service.Method"`.
    pub method: String,
    pub body: Vec<u8>,
}

/// Peer → caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResFrame {
    pub id: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Ok(Vec<u8>),
    Err(ErrorShape),
}

impl ResFrame {
    pub fn ok(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            outcome: Outcome::Ok(payload),
        }
    }

    pub fn err(id: u64, code: &str, message: &str) -> Self {
        Self {
            id,
            outcome: Outcome::Err(ErrorShape::new(code, message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Bincode-encode a body or frame.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

/// Decode a whole buffer; trailing bytes are an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) =
        bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(crate::error::RpcError::Codec(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}
