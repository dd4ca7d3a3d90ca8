//! Ordered execution of batch operations

use crate::backend::{BatchBackend, SnapshotBackend};
use crate::error::BatchError;
use crate::operation::{BatchOperation, BatchOperationResult, BatchOptions, BatchResult, OperationError};
use crate::temp_id;
use plandoc_store::{PlanCollections, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs batches against a [`BatchBackend`]
///
/// Operations execute strictly in input order. After an operation creates
/// an entity its temp id maps to the generated id, and later operations see
/// that mapping in their id-bearing fields.
///
/// Non-atomic batches (the default) record every failure in the result and
/// keep going. Atomic batches snapshot every collection first and restore
/// the snapshot on the first failure.
pub struct BatchEngine<B: BatchBackend> {
    backend: Arc<B>,
}

impl<B: BatchBackend> Clone for BatchEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: BatchBackend> BatchEngine<B> {
    /// Engine over `backend`
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Backend
    #[inline]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Execute `operations` against `plan_id`
    ///
    /// # Errors
    ///
    /// Rejects the whole batch up front on empty input, malformed or
    /// duplicate temp ids, and atomic mode on a backend without snapshot
    /// support. In atomic mode the first failing operation yields
    /// [`BatchError::AtomicRollback`]. Non-atomic per-operation failures are
    /// reported in [`BatchResult::results`] instead.
    pub async fn execute_batch(
        &self,
        plan_id: &str,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> Result<BatchResult, BatchError> {
        if operations.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        let declared = temp_id::validate(&operations)?;

        info!(
            plan_id,
            operations = operations.len(),
            atomic = options.atomic,
            "executing batch"
        );

        let result = if options.atomic {
            let snapshots = self.backend.snapshots().ok_or(BatchError::AtomicUnsupported)?;
            self.run_atomic(plan_id, operations, &declared, snapshots).await?
        } else {
            self.run(plan_id, operations).await
        };

        info!(
            plan_id,
            succeeded = result.succeeded(),
            failed = result.failed(),
            "batch finished"
        );
        Ok(result)
    }

    async fn run(&self, plan_id: &str, operations: Vec<BatchOperation>) -> BatchResult {
        let mut result = BatchResult::default();
        for (index, op) in operations.into_iter().enumerate() {
            let entity_type = op.entity_type();
            let temp_id = op.temp_id().map(str::to_owned);
            let outcome = self.apply(plan_id, index, op, &mut result.temp_id_mapping).await;
            let entry = match outcome {
                Ok(id) => BatchOperationResult {
                    index,
                    entity_type: entity_type.to_string(),
                    success: true,
                    id: Some(id),
                    temp_id,
                    error: None,
                },
                Err(err) => {
                    debug!(plan_id, index, entity_type, error = %err, "batch operation failed");
                    BatchOperationResult {
                        index,
                        entity_type: entity_type.to_string(),
                        success: false,
                        id: None,
                        temp_id,
                        error: Some(OperationError {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        }),
                    }
                }
            };
            result.results.push(entry);
        }
        result
    }

    async fn run_atomic(
        &self,
        plan_id: &str,
        operations: Vec<BatchOperation>,
        declared: &HashMap<String, usize>,
        snapshots: &dyn SnapshotBackend,
    ) -> Result<BatchResult, BatchError> {
        let snapshot = snapshots.load_collections(plan_id).await?;
        check_references(&operations, declared, &snapshot)?;

        let mut result = BatchResult::default();
        for (index, op) in operations.into_iter().enumerate() {
            let entity_type = op.entity_type();
            let temp_id = op.temp_id().map(str::to_owned);
            match self.apply(plan_id, index, op, &mut result.temp_id_mapping).await {
                Ok(id) => result.results.push(BatchOperationResult {
                    index,
                    entity_type: entity_type.to_string(),
                    success: true,
                    id: Some(id),
                    temp_id,
                    error: None,
                }),
                Err(cause) => {
                    warn!(plan_id, index, entity_type, error = %cause, "atomic batch failed, restoring snapshot");
                    let rollback_error = match snapshots.save_collections(plan_id, &snapshot).await {
                        Ok(()) => None,
                        Err(restore) => {
                            error!(plan_id, error = %restore, "snapshot restore failed");
                            Some(Box::new(restore))
                        }
                    };
                    return Err(BatchError::AtomicRollback {
                        index,
                        entity_type,
                        cause: Box::new(cause),
                        rollback_error,
                    });
                }
            }
        }
        Ok(result)
    }

    /// Resolve, create and record one operation
    async fn apply(
        &self,
        plan_id: &str,
        index: usize,
        mut op: BatchOperation,
        mapping: &mut BTreeMap<String, String>,
    ) -> Result<String, BatchError> {
        temp_id::resolve(index, &mut op, mapping)?;
        let (temp_id, draft) = op.into_draft();
        let id = self.backend.create(plan_id, draft).await?;
        if let Some(temp_id) = temp_id {
            mapping.insert(temp_id, id.clone());
        }
        Ok(id)
    }
}

/// Every literal id must exist in the snapshot and every temp id must be
/// declared by an earlier operation
fn check_references(
    operations: &[BatchOperation],
    declared: &HashMap<String, usize>,
    snapshot: &PlanCollections,
) -> Result<(), BatchError> {
    for (index, op) in operations.iter().enumerate() {
        for reference in op.id_refs() {
            if temp_id::is_temp_id(reference.value) {
                if !declared.get(reference.value).is_some_and(|&at| at < index) {
                    return Err(BatchError::UnresolvedReference {
                        index,
                        temp_id: reference.value.to_string(),
                        field: reference.field.path,
                    });
                }
                continue;
            }
            let found = snapshot.kind_of(reference.value);
            let matches = match reference.field.target {
                Some(kind) => found == Some(kind),
                None => found.is_some(),
            };
            if !matches {
                let resource = reference.field.target.map_or("entity", |k| k.as_str());
                return Err(StoreError::not_found(resource, reference.value).into());
            }
        }
    }
    Ok(())
}
