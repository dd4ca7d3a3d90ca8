//! Error types for the store
//!
//! Every error maps onto a stable [`ErrorKind`] whose code is what dispatch
//! layers put on the wire (`NOT_FOUND`, `CONFLICT`, ...).

use plandoc_lock::LockError;
use std::fmt;
use std::path::PathBuf;

/// Stable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity or plan does not exist
    NotFound,
    /// Bad input or malformed persisted data
    Validation,
    /// Version mismatch or duplicate
    Conflict,
    /// Lock could not be acquired or was lost
    Lock,
    /// Filesystem failure
    Storage,
    /// Unit of work misuse
    Transaction,
    /// A multi-item operation rejected one or more items
    BulkOperation,
    /// Reserved for schema migrations
    Migration,
}

impl ErrorKind {
    /// Wire code
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Validation => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT",
            Self::Lock => "LOCK_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Transaction => "TRANSACTION_ERROR",
            Self::BulkOperation => "BULK_OPERATION_ERROR",
            Self::Migration => "MIGRATION_ERROR",
        }
    }

    /// HTTP status a REST layer would answer with
    #[must_use]
    pub fn http_status_hint(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Validation | Self::Conflict | Self::BulkOperation => 400,
            Self::Lock => 503,
            Self::Storage | Self::Transaction | Self::Migration => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One rejected item of a multi-item operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position in the input
    pub index: usize,
    /// Entity id, when the item carried one
    pub id: Option<String>,
    /// Wire code of the underlying failure
    pub code: &'static str,
    /// Human readable reason
    pub message: String,
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// What was looked up (`requirement`, `plan`, `link`)
        resource: String,
        /// Identifier
        id: String,
    },

    /// Invalid input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persisted file is not valid JSON
    #[error("malformed JSON in {path} at line {line}, column {column} (byte {offset}): {message}")]
    MalformedJson {
        /// File that failed to parse
        path: PathBuf,
        /// Byte offset of the error
        offset: usize,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Parser message
        message: String,
    },

    /// Optimistic concurrency check failed
    #[error("version conflict on '{id}': expected {expected}, found {actual}")]
    VersionConflict {
        /// Entity id
        id: String,
        /// Version the caller based its update on
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Entity already exists
    #[error("{resource} '{id}' already exists")]
    Duplicate {
        /// Collection or record type
        resource: String,
        /// Identifier
        id: String,
    },

    /// Lock manager failure
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Filesystem failure
    #[error("storage error at {path}: {source}")]
    Storage {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Value could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unit of work misuse
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Multi-item operation rejected
    #[error("{message} ({} item(s) rejected)", failures.len())]
    BulkOperation {
        /// Summary
        message: String,
        /// Every rejected item
        failures: Vec<ItemFailure>,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Reserved for schema migrations
    #[error("migration error: {0}")]
    Migration(String),
}

/// Convenience alias
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Not-found error for a resource kind
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Storage error for a path
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) | Self::MalformedJson { .. } | Self::Config(_) => {
                ErrorKind::Validation
            }
            Self::VersionConflict { .. } | Self::Duplicate { .. } => ErrorKind::Conflict,
            Self::Lock(_) => ErrorKind::Lock,
            Self::Storage { .. } | Self::Serialization(_) => ErrorKind::Storage,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::BulkOperation { .. } => ErrorKind::BulkOperation,
            Self::Migration(_) => ErrorKind::Migration,
        }
    }

    /// Wire code
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Check if a later attempt could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(err) => err.is_retryable(),
            Self::VersionConflict { .. } => true,
            _ => false,
        }
    }
}
