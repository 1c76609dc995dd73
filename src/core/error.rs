//! Unified error handling for reqflow
//!
//! Every failure a request can settle with is expressed as a [`SyncError`].
//! Errors are captured at the coordinator boundary and recorded in history,
//! so the type is cheap to clone and carries owned messages only.

use std::fmt;

/// Coarse classification of a [`SyncError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Network,
    Unknown,
    Configuration,
    Internal,
}

/// Unified error types for request coordination
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The operation was aborted, usually superseded by a newer request to the same endpoint
    Cancelled(String),

    /// Transport failure, non-2xx response or response parse failure
    Network {
        status: Option<u16>,
        message: String,
    },

    /// Anything the environment surfaced that is not a recognised error (task panics included)
    Unknown(String),

    /// Configuration loading or validation errors
    Configuration(String),

    /// Internal invariant violations
    Internal(String),
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        SyncError::Network {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Cancelled(_) => ErrorKind::Cancelled,
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Unknown(_) => ErrorKind::Unknown,
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled(_))
    }

    /// HTTP status of the failed response, when there was one
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Cancelled(msg) => write!(f, "Request cancelled: {msg}"),
            SyncError::Network {
                status: Some(status),
                message,
            } => write!(f, "Network error ({status}): {message}"),
            SyncError::Network {
                status: None,
                message,
            } => write!(f, "Network error: {message}"),
            SyncError::Unknown(msg) => write!(f, "Unknown error: {msg}"),
            SyncError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            SyncError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}

/// Result type alias for reqflow operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> SyncResult<T>;
    fn config_context(self, context: &str) -> SyncResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> SyncResult<T> {
        self.map_err(|e| SyncError::Internal(format!("{context}: {e}")))
    }

    fn config_context(self, context: &str) -> SyncResult<T> {
        self.map_err(|e| SyncError::Configuration(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::SyncError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::SyncError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::SyncError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::SyncError::Internal(format!($fmt, $($arg)*))
    };
}
