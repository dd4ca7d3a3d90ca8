//! plandoc Lock Manager
//!
//! Named mutual exclusion that holds across tasks in one process and across
//! processes sharing a directory.
//!
//! # Layers
//!
//! ```text
//! acquire("plan-1/requirements")
//!     │
//!     ├─ reentrant fast path ── same holder already holds it → ref_count += 1
//!     │
//!     ├─ in-process FIFO queue (one tokio mutex per resource name)
//!     │
//!     └─ lock artifact  .locks/plan-1%2Frequirements.lock
//!            created with O_EXCL, held under an fs2 exclusive lock,
//!            taken over once older than the stale threshold
//! ```
//!
//! Distinct resource names never share a queue, so they proceed in parallel.
//!
//! # Example
//!
//! ```rust,ignore
//! use plandoc_lock::{AcquireOptions, LockConfig, LockManager};
//!
//! # async fn example() -> Result<(), plandoc_lock::LockError> {
//! let locks = LockManager::new("/tmp/store/.locks", LockConfig::default());
//! locks.initialize().await?;
//!
//! let answer = locks
//!     .with_lock("plan-1/requirements", AcquireOptions::new(), || async {
//!         Ok::<_, plandoc_lock::LockError>(42)
//!     })
//!     .await?;
//!
//! locks.dispose().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
mod file_lock;
mod manager;
pub mod record;

pub use config::{AcquireOptions, LockConfig};
pub use error::{LockError, LockFailureReason};
pub use file_lock::{scan_lock_dir, LockStatus};
pub use manager::{LockGuard, LockManager};
pub use record::{encode_resource, lock_file_name, LockRecord};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
