//! Error types for Gridlink transport operations.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for transport operations.
///
/// Programmer faults (writing past a mark, using a closed stream, negative
/// lengths) are not represented here; they panic at the call site. Everything
/// recoverable flows through this enum.
#[derive(Debug, Error, Clone)]
pub enum GridError {
    /// Wire-protocol violations: bad magic, unsupported version, checksum
    /// mismatch, oversize payload, interleaved fragments.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Resource exhaustion, e.g. the buffer pool refused an acquisition.
    #[error("resource error: {0}")]
    Resource(String),

    /// Encoding or decoding of typed records failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The connection is closed or closing; queued work was cancelled.
    #[error("connection closed: {0}")]
    Closed(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {0}")]
    Lifecycle(String),

    /// The connection manager has been shut down.
    #[error("manager shutdown")]
    Shutdown,

    /// An operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the operating system (wrapped in `Arc` for `Clone`).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for GridError {
    fn from(err: io::Error) -> Self {
        GridError::Io(Arc::new(err))
    }
}

impl GridError {
    /// Returns the fault category for structured handling.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Protocol(_) => FaultKind::Protocol,
            Self::Resource(_) => FaultKind::Resource,
            Self::Serialization(_) => FaultKind::Data,
            Self::Closed(_) | Self::Lifecycle(_) | Self::Shutdown => FaultKind::Lifecycle,
            Self::Timeout(_) => FaultKind::Io,
            Self::Configuration(_) => FaultKind::Lifecycle,
            Self::Io(_) => FaultKind::Io,
        }
    }

    /// Returns `true` if this is a protocol fault that must close the
    /// offending connection.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if this error is transient and the operation may be
    /// retried on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resource(_) | Self::Timeout(_) | Self::Io(_) => true,
            Self::Closed(_) => true,
            _ => false,
        }
    }
}

/// Classification of transport faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Wire-protocol violations; the connection is closed.
    Protocol,
    /// Resource exhaustion; pressure subsides when buffers are released.
    Resource,
    /// Malformed typed records.
    Data,
    /// Use of a closed or shut-down component.
    Lifecycle,
    /// Operating-system level failures.
    Io,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "PROTOCOL"),
            Self::Resource => write!(f, "RESOURCE"),
            Self::Data => write!(f, "DATA"),
            Self::Lifecycle => write!(f, "LIFECYCLE"),
            Self::Io => write!(f, "IO"),
        }
    }
}

/// A specialized `Result` type for transport operations.
pub type Result<T> = std::result::Result<T, GridError>;
