//! Error types for fecmesh
//!
//! One flat enum covering every error kind named in the system design:
//! encoding/decoding, storage, metadata, peer communication, and
//! reconstruction failures. Library code never swallows a cause or
//! retries indefinitely; retry policy lives at the call sites (the RPC
//! client, the replication controller) and only the final failure is
//! surfaced here.

use thiserror::Error;

/// Result type used throughout fecmesh.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for fecmesh.
#[derive(Debug, Error)]
pub enum Error {
    // Erasure coding
    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("decoding failed: {0}")]
    Decoding(String),

    #[error("insufficient shards: available {available}, required {required}, missing {missing:?}")]
    InsufficientShards {
        available: usize,
        required: usize,
        missing: Vec<u16>,
    },

    // Integrity
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Validation { expected: String, actual: String },

    // Storage (C2)
    #[error("storage error: {0}")]
    Storage(String),

    #[error("shard not found: file={file} index={index} owner={owner}")]
    ShardNotFound {
        file: String,
        index: u16,
        owner: String,
    },

    // Metadata index (C3)
    #[error("index error: {0}")]
    Index(String),

    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    // Peer transport (C4)
    #[error("peer communication error: {0}")]
    PeerCommunication(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    // Replication (C6)
    #[error("replication error: {0}")]
    Replication(String),

    // Configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    // Generic
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a storage error from a displayable cause.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error from a displayable cause.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry at the call site is sensible for this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::PeerCommunication(_)
        )
    }

    /// Whether this error represents a "does not exist" condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ShardNotFound { .. } | Self::ManifestNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(!Error::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn not_found_errors() {
        assert!(Error::ManifestNotFound("f".into()).is_not_found());
        assert!(Error::ShardNotFound {
            file: "f".into(),
            index: 0,
            owner: "o".into(),
        }
        .is_not_found());
        assert!(!Error::Timeout.is_not_found());
    }
}
