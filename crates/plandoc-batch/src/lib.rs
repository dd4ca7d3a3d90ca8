//! plandoc Batch
//!
//! Creates many interdependent entities in one call. Operations may declare
//! a temp id (`$0`, `$1`, ...) that later operations use in id-bearing
//! fields; the engine swaps in the generated id once the declaring
//! operation has run. Free text is never rewritten.
//!
//! # Example
//!
//! ```rust,ignore
//! use plandoc_batch::{BatchEngine, BatchOperation, BatchOptions};
//!
//! let engine = BatchEngine::new(factory);
//! let ops: Vec<BatchOperation> = serde_json::from_str(input)?;
//! let result = engine.execute_batch("plan-1", ops, BatchOptions::atomic()).await?;
//! println!("{}", result.resolve("$0").unwrap_or("-"));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backend;
pub mod engine;
pub mod error;
pub mod operation;
pub mod temp_id;

pub use backend::{BatchBackend, SnapshotBackend};
pub use engine::BatchEngine;
pub use error::BatchError;
pub use operation::{
    BatchOperation, BatchOperationResult, BatchOptions, BatchPayload, BatchResult, Draft,
    OperationError,
};
pub use temp_id::{is_temp_id, looks_like_temp_id};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
