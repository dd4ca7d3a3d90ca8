//! Advisory transaction boundary
//!
//! A unit of work tracks whether a logical operation is in progress and how
//! many writes it made. It does not buffer or undo anything: every
//! repository write is already durable, so `rollback` can only tell its
//! listeners what was left behind.

use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Notice delivered to warning listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionWarning {
    /// Plan the unit of work belongs to
    pub plan_id: String,
    /// Writes that were already persisted when the boundary closed
    pub operations: usize,
    /// Human readable message
    pub message: String,
}

type WarningListener = Arc<dyn Fn(&TransactionWarning) + Send + Sync>;

#[derive(Debug, Default)]
struct State {
    active: bool,
    disposed: bool,
    operations: usize,
    started_at: Option<Instant>,
}

/// Transaction boundary for one plan
pub struct UnitOfWork {
    plan_id: String,
    state: Mutex<State>,
    listeners: Mutex<Vec<WarningListener>>,
}

impl UnitOfWork {
    /// Idle unit of work for `plan_id`
    #[must_use]
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            state: Mutex::new(State::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Owning plan
    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    /// Check if a boundary is open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Writes recorded since `begin`
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.state.lock().operations
    }

    /// Open a boundary
    pub fn begin(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(StoreError::Transaction(format!(
                "unit of work for plan '{}' is disposed",
                self.plan_id
            )));
        }
        if state.active {
            return Err(StoreError::Transaction(
                "a transaction is already active".into(),
            ));
        }
        state.active = true;
        state.operations = 0;
        state.started_at = Some(Instant::now());
        debug!(plan_id = %self.plan_id, "transaction started");
        Ok(())
    }

    /// Count one write against the open boundary
    pub fn record_operation(&self) {
        let mut state = self.state.lock();
        if state.active {
            state.operations += 1;
        }
    }

    /// Close the boundary successfully
    pub fn commit(&self) -> StoreResult<()> {
        let (operations, elapsed) = self.close("commit")?;
        debug!(plan_id = %self.plan_id, operations, elapsed_ms = elapsed, "transaction committed");
        Ok(())
    }

    /// Close the boundary after a failure
    ///
    /// Persisted writes stay persisted; listeners are told how many there
    /// were. Fails only when no boundary is open.
    pub fn rollback(&self) -> StoreResult<()> {
        let (operations, _) = self.close("rollback")?;
        let warning = TransactionWarning {
            plan_id: self.plan_id.clone(),
            operations,
            message: format!(
                "rollback cannot undo {operations} operation(s) already persisted; \
                 file-based storage has no multi-file transactions"
            ),
        };
        warn!(plan_id = %self.plan_id, operations, "transaction rolled back without undo");
        self.emit(&warning);
        Ok(())
    }

    /// Run `f` inside a boundary
    ///
    /// Opens one when none is active and then commits or rolls back depending
    /// on the outcome. When a boundary was already open it is left alone.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let opened = if self.is_active() {
            false
        } else {
            self.begin()?;
            true
        };

        match f().await {
            Ok(value) => {
                if opened {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if opened {
                    if let Err(rollback_err) = self.rollback() {
                        warn!(plan_id = %self.plan_id, error = %rollback_err, "rollback after failure failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Register a warning listener
    pub fn on_warning<F>(&self, listener: F)
    where
        F: Fn(&TransactionWarning) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Close any open boundary and refuse new ones
    pub fn dispose(&self) {
        if self.is_active() {
            let _ = self.rollback();
        }
        self.state.lock().disposed = true;
        self.listeners.lock().clear();
    }

    fn close(&self, op: &str) -> StoreResult<(usize, u64)> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(StoreError::Transaction(format!(
                "cannot {op}: no active transaction"
            )));
        }
        let operations = state.operations;
        let elapsed = state
            .started_at
            .map_or(0, |t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX));
        *state = State {
            disposed: state.disposed,
            ..State::default()
        };
        Ok((operations, elapsed))
    }

    fn emit(&self, warning: &TransactionWarning) {
        let listeners: Vec<WarningListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(warning);
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("plan_id", &self.plan_id)
            .field("state", &*self.state.lock())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn begin_commit_cycle() {
        let uow = UnitOfWork::new("p1");
        uow.begin().unwrap();
        assert!(uow.begin().is_err());
        uow.record_operation();
        uow.record_operation();
        assert_eq!(uow.operation_count(), 2);

        uow.commit().unwrap();
        assert!(!uow.is_active());
        assert_eq!(uow.operation_count(), 0);
        assert!(uow.commit().is_err());
    }

    #[test]
    fn rollback_warns_listeners() {
        let uow = UnitOfWork::new("p1");
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        uow.on_warning(move |w| {
            sink.store(w.operations, Ordering::SeqCst);
        });

        assert_eq!(uow.rollback().unwrap_err().code(), "TRANSACTION_ERROR");
        uow.begin().unwrap();
        uow.record_operation();
        uow.rollback().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_manages_only_its_own_boundary() {
        let uow = UnitOfWork::new("p1");

        let value = uow
            .execute(|| async { Ok::<_, StoreError>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert!(!uow.is_active());

        uow.begin().unwrap();
        let result: StoreResult<()> = uow
            .execute(|| async { Err(StoreError::validation("boom")) })
            .await;
        assert!(result.is_err());
        assert!(uow.is_active(), "outer boundary must stay open");
        uow.commit().unwrap();
    }

    #[tokio::test]
    async fn execute_rolls_back_on_error() {
        let uow = UnitOfWork::new("p1");
        let warned = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&warned);
        uow.on_warning(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let result: StoreResult<()> = uow
            .execute(|| async { Err(StoreError::validation("boom")) })
            .await;
        assert!(result.is_err());
        assert!(!uow.is_active());
        assert_eq!(warned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_unit_rejects_begin() {
        let uow = UnitOfWork::new("p1");
        uow.dispose();
        assert!(uow.begin().is_err());
    }
}
