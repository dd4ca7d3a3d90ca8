//! Error types for the batch engine

use plandoc_store::StoreError;

/// Batch failures
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No operations given
    #[error("batch contains no operations")]
    EmptyBatch,

    /// Temp id not of the form `$<integer>`
    #[error("operation {index}: invalid temp id {value:?}, expected `$<integer>`")]
    InvalidTempId {
        /// Operation position
        index: usize,
        /// Offending value
        value: String,
    },

    /// Same temp id declared twice
    #[error("temp id {temp_id} declared by operations {first} and {second}")]
    DuplicateTempId {
        /// Temp id
        temp_id: String,
        /// First declaration
        first: usize,
        /// Second declaration
        second: usize,
    },

    /// Temp id referenced before it was created
    #[error("operation {index}: {field} references {temp_id}, which no earlier operation created")]
    UnresolvedReference {
        /// Operation position
        index: usize,
        /// Unresolved temp id
        temp_id: String,
        /// Field holding the reference
        field: &'static str,
    },

    /// Atomic mode requested on a backend without snapshot support
    #[error("atomic batches need a backend that can load and save whole collections")]
    AtomicUnsupported,

    /// Atomic batch failed and was rolled back
    #[error("{}", rollback_message(*index, entity_type, cause, rollback_error.as_deref()))]
    AtomicRollback {
        /// Operation that failed
        index: usize,
        /// Its entity type
        entity_type: &'static str,
        /// Why it failed
        cause: Box<BatchError>,
        /// Restore failure, if the snapshot could not be written back
        rollback_error: Option<Box<StoreError>>,
    },

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn rollback_message(
    index: usize,
    entity_type: &str,
    cause: &BatchError,
    rollback_error: Option<&StoreError>,
) -> String {
    match rollback_error {
        None => format!("atomic batch failed at operation {index} ({entity_type}): {cause}; all changes rolled back"),
        Some(restore) => format!(
            "atomic batch failed at operation {index} ({entity_type}): {cause}; rollback failed: {restore}"
        ),
    }
}

impl BatchError {
    /// Wire code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyBatch
            | Self::InvalidTempId { .. }
            | Self::DuplicateTempId { .. }
            | Self::UnresolvedReference { .. }
            | Self::AtomicUnsupported => "VALIDATION_ERROR",
            Self::AtomicRollback { .. } => "TRANSACTION_ERROR",
            Self::Store(err) => err.code(),
        }
    }
}
