//! Error types for the lock manager

use std::path::PathBuf;

/// Coarse failure class, stable across message wording changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockFailureReason {
    /// The time budget ran out
    Timeout,
    /// The attempt cap was reached first
    MaxRetries,
    /// The manager is disposed or disposing
    Disposed,
    /// The lock artifact vanished or was replaced while held
    ExternallyReleased,
    /// Release or extend by someone who does not hold the lock
    NotHeld,
    /// Empty resource name
    InvalidResource,
    /// Filesystem failure
    Io,
}

/// Lock manager errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Acquisition time budget exhausted
    #[error("timed out after {waited_ms}ms acquiring lock '{resource}'")]
    Timeout {
        /// Resource name
        resource: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Attempt cap reached before the time budget
    #[error("gave up acquiring lock '{resource}' after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Resource name
        resource: String,
        /// Attempts made
        attempts: u32,
    },

    /// Manager disposed
    #[error("lock manager disposed; cannot acquire '{resource}'")]
    Disposed {
        /// Resource name
        resource: String,
    },

    /// Lock artifact removed or replaced by someone else while held
    #[error("lock '{resource}' held by '{holder}' was removed externally before release")]
    ExternallyReleased {
        /// Resource name
        resource: String,
        /// Holder that believed it owned the lock
        holder: String,
    },

    /// Caller does not hold the lock
    #[error("lock '{resource}' is not held by '{holder}'")]
    NotHeld {
        /// Resource name
        resource: String,
        /// Caller identity
        holder: String,
    },

    /// Invalid resource name
    #[error("invalid lock resource name: {0:?}")]
    InvalidResource(String),

    /// IO error on a lock artifact
    #[error("io error on lock file {path}: {source}")]
    Io {
        /// Lock artifact path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Failure class
    #[must_use]
    pub fn reason(&self) -> LockFailureReason {
        match self {
            Self::Timeout { .. } => LockFailureReason::Timeout,
            Self::MaxRetriesExceeded { .. } => LockFailureReason::MaxRetries,
            Self::Disposed { .. } => LockFailureReason::Disposed,
            Self::ExternallyReleased { .. } => LockFailureReason::ExternallyReleased,
            Self::NotHeld { .. } => LockFailureReason::NotHeld,
            Self::InvalidResource(_) => LockFailureReason::InvalidResource,
            Self::Io { .. } => LockFailureReason::Io,
        }
    }

    /// Check if a later attempt could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.reason(),
            LockFailureReason::Timeout | LockFailureReason::MaxRetries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_max_retries_are_distinguishable() {
        let timeout = LockError::Timeout {
            resource: "r".into(),
            waited_ms: 100,
        };
        let retries = LockError::MaxRetriesExceeded {
            resource: "r".into(),
            attempts: 3,
        };

        assert_eq!(timeout.reason(), LockFailureReason::Timeout);
        assert_eq!(retries.reason(), LockFailureReason::MaxRetries);
        assert!(timeout.is_retryable());
        assert!(retries.is_retryable());
        assert!(timeout.to_string().contains("timed out after 100ms"));
    }

    #[test]
    fn disposed_is_not_retryable() {
        let err = LockError::Disposed {
            resource: "r".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "lock manager disposed; cannot acquire 'r'");
    }
}
