/*!
Error types for the snapshot capture engine.
*/

use thiserror::Error;
use valkey_snapshot_retry::RetryableError;

/// Result type used throughout the capture engine.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while capturing and shipping snapshots.
///
/// Only [`SnapshotError::Config`] is fatal to the process. Everything else is
/// scoped to a single capture task and reported at the task boundary.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint unreachable or rejected the connection
    #[error("Unable to connect to endpoint '{endpoint}': {reason}")]
    Connect { endpoint: String, reason: String },

    /// A single key or single read failed
    #[error("Read error: {0}")]
    Read(String),

    /// Document could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Replication handshake or stream violated expectations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Storage backend rejected the artifact or was unreachable.
    ///
    /// `transient` is decided where the backend failure is classified and is
    /// the only thing retry looks at.
    #[error("Upload error: {message}")]
    Upload { message: String, transient: bool },

    /// Storage adapter errors outside of the upload call itself
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors on sockets or files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors reported by the key-value store client
    #[error("Store error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl SnapshotError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new connect error for the named endpoint
    pub fn connect<E: Into<String>, S: Into<String>>(endpoint: E, reason: S) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a new read error
    pub fn read<S: Into<String>>(msg: S) -> Self {
        Self::Read(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new upload error that retrying will not fix
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a new upload error worth retrying
    pub fn transient_upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Short label used in logs and round reports
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotError::Config(_) => "config",
            SnapshotError::Connect { .. } => "connect",
            SnapshotError::Read(_) | SnapshotError::Redis(_) => "read",
            SnapshotError::Serialize(_) => "serialize",
            SnapshotError::Protocol(_) => "protocol",
            SnapshotError::Upload { .. } | SnapshotError::Storage(_) => "upload",
            SnapshotError::Io(_) => "io",
        }
    }
}

impl RetryableError for SnapshotError {
    fn is_transient(&self) -> bool {
        match self {
            SnapshotError::Upload { transient, .. } => *transient,
            SnapshotError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
