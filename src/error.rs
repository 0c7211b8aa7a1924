//! Error types for storage operations
//!
//! Every backend maps its SDK failures into [`StorageError`] at the adapter
//! boundary, so callers only ever see the categories described by
//! [`ErrorKind`]. The retry executor decides what to retry by looking at
//! [`StorageError::kind`] alone.

use serde::Deserialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failure category shared by every backend
///
/// Deserializes from the same kebab-case names it displays as, so retry
/// settings can name categories (`retry_on = ["connection", "capacity"]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Key absent
    NotFound,
    /// Conflicting key on a create-only path
    AlreadyExists,
    /// Credentials lack access to the resource
    PermissionDenied,
    /// Network or service unavailable (the only category retried by default)
    Connection,
    /// Bad credentials, bucket, container or missing dependency
    Configuration,
    /// Quota or size limit exceeded
    Capacity,
    /// All retry attempts consumed
    RetryExhausted,
    /// Caller misuse of a multipart session or part
    InvalidOperation,
    /// Caller cancelled the operation
    Cancelled,
    /// Anything the backend could not classify
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Connection => "connection",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Capacity => "capacity",
            ErrorKind::RetryExhausted => "retry-exhausted",
            ErrorKind::InvalidOperation => "invalid-operation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Unified error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key not found on backend
    #[error("File not found: {key}")]
    NotFound { key: String },

    /// Key already exists
    #[error("File already exists: {key}")]
    AlreadyExists { key: String },

    /// Permission denied accessing resource
    #[error("Permission denied for {key}: {message}")]
    PermissionDenied { key: String, message: String },

    /// Network or service failure talking to a backend
    #[error("Connection to {backend} failed: {message}")]
    Connection { backend: String, message: String },

    /// Invalid backend configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Quota or size limit exceeded
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Final failure after every retry was consumed
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },

    /// A part was rejected by the multipart session
    #[error("Invalid part {part_number} for upload {upload_id}: {reason}")]
    InvalidPart {
        upload_id: String,
        part_number: u32,
        reason: String,
    },

    /// The multipart session is not in a state that allows the operation
    #[error("Upload {upload_id} cannot {operation} while {state}")]
    InvalidUploadState {
        upload_id: String,
        operation: &'static str,
        state: String,
    },

    /// Invalid argument outside of a multipart session
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Original failure with a secondary failure from the cleanup that followed it
    #[error("{error} (cleanup also failed: {cleanup_error})")]
    CleanupFailed {
        #[source]
        error: Box<StorageError>,
        cleanup_error: Box<StorageError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Uncategorised backend failure
    #[error("Backend error on {backend}: {message}")]
    Backend { backend: String, message: String },
}

impl StorageError {
    /// Create a not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        StorageError::NotFound { key: key.into() }
    }

    /// Create a connection error
    pub fn connection(backend: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Connection {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create an uncategorised backend error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StorageError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            StorageError::Connection { .. } => ErrorKind::Connection,
            StorageError::Configuration(_) => ErrorKind::Configuration,
            StorageError::Capacity(_) => ErrorKind::Capacity,
            StorageError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            StorageError::InvalidPart { .. }
            | StorageError::InvalidUploadState { .. }
            | StorageError::InvalidArgument(_) => ErrorKind::InvalidOperation,
            StorageError::Cancelled => ErrorKind::Cancelled,
            // The cleanup note never replaces the original category
            StorageError::CleanupFailed { error, .. } => error.kind(),
            StorageError::Io(e) => io_kind(e),
            StorageError::Backend { .. } => ErrorKind::Other,
        }
    }

    /// Check if this error indicates the resource was not found
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Attach a failure from cleanup (abort) to the original failure
    pub fn with_cleanup_failure(self, cleanup_error: StorageError) -> Self {
        StorageError::CleanupFailed {
            error: Box::new(self),
            cleanup_error: Box::new(cleanup_error),
        }
    }

    /// The failure that caused retries to be exhausted, if this is one
    pub fn last_attempt_error(&self) -> Option<&StorageError> {
        match self {
            StorageError::RetryExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Classify an I/O error
fn io_kind(err: &io::Error) -> ErrorKind {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => ErrorKind::NotFound,
        PermissionDenied => ErrorKind::PermissionDenied,
        AlreadyExists => ErrorKind::AlreadyExists,
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | TimedOut | Interrupted | UnexpectedEof => ErrorKind::Connection,
        _ => ErrorKind::Other,
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        // Map specific I/O errors to more specific storage errors
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound { key: String::new() },
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                key: String::new(),
                message: err.to_string(),
            },
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists { key: String::new() },
            _ => StorageError::Io(err),
        }
    }
}
