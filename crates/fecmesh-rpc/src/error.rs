//! JSON-RPC error codes and the wire error object, per §4.4.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Standard JSON-RPC 2.0 codes plus fecmesh's application codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum RpcErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InternalError = -32603,
    ChunkNotFound = 1001,
    StorageError = 1002,
    ValidationError = 1003,
}

impl RpcErrorCode {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

/// The `error` object of a JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i64(),
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ParseError, message)
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, message)
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(RpcErrorCode::MethodNotFound, format!("unknown method: {method}"))
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn chunk_not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ChunkNotFound, message)
    }

    #[must_use]
    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::StorageError, message)
    }

    #[must_use]
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ValidationError, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Transport-level failures: everything short of a well-formed
/// JSON-RPC error response (§4.4 "connection hygiene": any I/O
/// failure closes the connection and is surfaced, not retried, at
/// this layer).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not resolve address for peer {0}")]
    AddressResolution(String),

    #[error("connection failed after {attempts} attempts: {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<TransportError> for fecmesh_common::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => fecmesh_common::Error::Timeout,
            TransportError::ConnectFailed { source, .. } => {
                fecmesh_common::Error::ConnectionFailed(source.to_string())
            }
            TransportError::Rpc(rpc) if rpc.code == RpcErrorCode::ChunkNotFound.as_i64() => {
                fecmesh_common::Error::PeerCommunication(rpc.message)
            }
            other => fecmesh_common::Error::PeerCommunication(other.to_string()),
        }
    }
}
