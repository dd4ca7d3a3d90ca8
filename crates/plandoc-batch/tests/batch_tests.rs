//! Batch engine against a real store

use async_trait::async_trait;
use plandoc_batch::{
    BatchBackend, BatchEngine, BatchError, BatchOperation, BatchOptions, BatchPayload, Draft,
    SnapshotBackend,
};
use plandoc_model::{EntityKind, LinkData, Phase, PhaseData, RelationType, Requirement, RequirementData, Solution};
use plandoc_store::{PlanCollections, StoreError, StoreResult};
use plandoc_test_utils::{decision_data, requirement, TestStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn ops(value: serde_json::Value) -> Vec<BatchOperation> {
    serde_json::from_value(value).unwrap()
}

fn collection_files(store: &TestStore) -> Vec<PathBuf> {
    let layout = store.factory.layout();
    let mut files: Vec<PathBuf> = EntityKind::ALL
        .iter()
        .map(|kind| layout.entity_file(&store.plan_id, *kind))
        .collect();
    files.push(layout.links_file(&store.plan_id));
    files
}

fn read_all(files: &[PathBuf]) -> Vec<Vec<u8>> {
    files.iter().map(|f| std::fs::read(f).unwrap()).collect()
}

#[tokio::test]
async fn solution_addresses_requirement_created_in_same_batch() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let result = engine
        .execute_batch(
            &store.plan_id,
            ops(json!([
                {"entityType": "requirement", "payload": {"tempId": "$0", "title": "Offline mode"}},
                {"entityType": "solution", "payload": {"tempId": "$1", "title": "Local cache", "addressing": ["$0"]}}
            ])),
            BatchOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded(), 2);
    let requirement_id = result.resolve("$0").unwrap();
    let solution = store
        .factory
        .repository::<Solution>(&store.plan_id)
        .unwrap()
        .find_by_id(result.resolve("$1").unwrap())
        .await
        .unwrap();
    assert_eq!(solution.data.addressing, vec![requirement_id.to_string()]);
}

#[tokio::test]
async fn mapping_follows_input_order_and_phases_nest() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let result = engine
        .execute_batch(
            &store.plan_id,
            ops(json!([
                {"entityType": "phase", "payload": {"tempId": "$0", "title": "Design"}},
                {"entityType": "phase", "payload": {"tempId": "$1", "title": "Schema", "parentId": "$0"}},
                {"entityType": "phase", "payload": {"tempId": "$2", "title": "API", "parentId": "$0"}}
            ])),
            BatchOptions::default(),
        )
        .await
        .unwrap();

    for (i, temp_id) in ["$0", "$1", "$2"].iter().enumerate() {
        assert_eq!(result.temp_id_mapping.get(*temp_id), result.results[i].id.as_ref());
        assert_eq!(result.results[i].temp_id.as_deref(), Some(*temp_id));
    }

    let phases = store.factory.repository::<Phase>(&store.plan_id).unwrap();
    let root = phases.find_by_id(result.resolve("$0").unwrap()).await.unwrap();
    let second = phases.find_by_id(result.resolve("$2").unwrap()).await.unwrap();
    assert_eq!((root.data.depth, root.data.order), (0, 1));
    assert_eq!((second.data.depth, second.data.order), (1, 2));
    assert_eq!(second.data.path, format!("{}/{}", root.id, second.id));
}

#[tokio::test]
async fn free_text_is_left_alone() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let result = engine
        .execute_batch(
            &store.plan_id,
            vec![BatchOperation::Requirement(BatchPayload::with_temp_id(
                "$0",
                RequirementData {
                    description: "replaces $0 in the old design".into(),
                    ..RequirementData::titled("$0 title")
                },
            ))],
            BatchOptions::default(),
        )
        .await
        .unwrap();

    let stored = store
        .factory
        .repository::<Requirement>(&store.plan_id)
        .unwrap()
        .find_by_id(result.resolve("$0").unwrap())
        .await
        .unwrap();
    assert_eq!(stored.data.title, "$0 title");
    assert_eq!(stored.data.description, "replaces $0 in the old design");
}

#[tokio::test]
async fn non_atomic_batch_keeps_earlier_successes() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let result = engine
        .execute_batch(
            &store.plan_id,
            ops(json!([
                {"entityType": "requirement", "payload": {"tempId": "$0", "title": "kept"}},
                {"entityType": "phase", "payload": {"title": "orphan", "parentId": "no-such-phase"}},
                {"entityType": "solution", "payload": {"title": "dangling", "addressing": ["$7"]}},
                {"entityType": "decision", "payload": {"title": "also kept"}}
            ])),
            BatchOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!((result.succeeded(), result.failed()), (2, 2));
    assert_eq!(result.results[1].error.as_ref().unwrap().code, "NOT_FOUND");
    assert_eq!(result.results[2].error.as_ref().unwrap().code, "VALIDATION_ERROR");
    assert!(result.results[2].error.as_ref().unwrap().message.contains("$7"));

    let count = store
        .factory
        .repository::<Requirement>(&store.plan_id)
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn atomic_failure_restores_every_collection_byte_for_byte() {
    let store = TestStore::new().await;
    store
        .factory
        .repository::<Requirement>(&store.plan_id)
        .unwrap()
        .create(requirement("pre-existing"))
        .await
        .unwrap();
    let files = collection_files(&store);
    let before = read_all(&files);

    let engine = BatchEngine::new(Arc::clone(&store.factory));
    let err = engine
        .execute_batch(
            &store.plan_id,
            ops(json!([
                {"entityType": "requirement", "payload": {"tempId": "$0", "title": "new"}},
                {"entityType": "solution", "payload": {"tempId": "$1", "title": "s", "addressing": ["$0"]}},
                {"entityType": "link", "payload": {"sourceId": "$1", "targetId": "$0", "relationType": "implements"}},
                {"entityType": "link", "payload": {"sourceId": "$1", "targetId": "$0", "relationType": "implements"}}
            ])),
            BatchOptions::atomic(),
        )
        .await
        .unwrap_err();

    match &err {
        BatchError::AtomicRollback {
            index,
            entity_type,
            rollback_error,
            ..
        } => {
            assert_eq!((*index, *entity_type), (3, "link"));
            assert!(rollback_error.is_none());
        }
        other => panic!("expected AtomicRollback, got {other:?}"),
    }
    assert_eq!(err.code(), "TRANSACTION_ERROR");
    assert_eq!(read_all(&files), before);
}

#[tokio::test]
async fn atomic_batch_rejects_missing_literal_ids_before_writing() {
    let store = TestStore::new().await;
    let files = collection_files(&store);
    let before = read_all(&files);

    let engine = BatchEngine::new(Arc::clone(&store.factory));
    let err = engine
        .execute_batch(
            &store.plan_id,
            vec![
                BatchOperation::Decision(BatchPayload::new(decision_data("d"))),
                BatchOperation::Phase(BatchPayload::new(PhaseData::titled(
                    "child",
                    Some("missing-parent".into()),
                ))),
            ],
            BatchOptions::atomic(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::Store(StoreError::NotFound { .. })));
    assert_eq!(read_all(&files), before);
}

#[tokio::test]
async fn forward_reference_is_unresolved() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));
    let batch = ops(json!([
        {"entityType": "solution", "payload": {"title": "early", "addressing": ["$1"]}},
        {"entityType": "requirement", "payload": {"tempId": "$1", "title": "late"}}
    ]));

    let err = engine
        .execute_batch(&store.plan_id, batch.clone(), BatchOptions::atomic())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BatchError::UnresolvedReference { index: 0, field: "addressing", .. }
    ));

    let result = engine
        .execute_batch(&store.plan_id, batch, BatchOptions::default())
        .await
        .unwrap();
    assert!(!result.results[0].success);
    assert!(result.results[1].success);
}

#[tokio::test]
async fn malformed_batches_are_rejected_up_front() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let empty = engine
        .execute_batch(&store.plan_id, Vec::new(), BatchOptions::default())
        .await;
    assert!(matches!(empty, Err(BatchError::EmptyBatch)));

    let duplicate = engine
        .execute_batch(
            &store.plan_id,
            ops(json!([
                {"entityType": "requirement", "payload": {"tempId": "$0", "title": "a"}},
                {"entityType": "requirement", "payload": {"tempId": "$0", "title": "b"}}
            ])),
            BatchOptions::default(),
        )
        .await;
    assert!(matches!(duplicate, Err(BatchError::DuplicateTempId { .. })));

    let count = store
        .factory
        .repository::<Requirement>(&store.plan_id)
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn self_link_fails_validation() {
    let store = TestStore::new().await;
    let engine = BatchEngine::new(Arc::clone(&store.factory));

    let result = engine
        .execute_batch(
            &store.plan_id,
            vec![
                BatchOperation::Requirement(BatchPayload::with_temp_id("$0", RequirementData::titled("r"))),
                BatchOperation::Link(BatchPayload::new(LinkData::new("$0", "$0", RelationType::References))),
            ],
            BatchOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.results[1].error.as_ref().unwrap().code, "VALIDATION_ERROR");
}

/// Backend that can create but not snapshot
struct CreateOnly;

#[async_trait]
impl BatchBackend for CreateOnly {
    async fn create(&self, _plan_id: &str, _draft: Draft) -> StoreResult<String> {
        Ok("fixed".into())
    }

    fn snapshots(&self) -> Option<&dyn SnapshotBackend> {
        None
    }
}

#[tokio::test]
async fn atomic_mode_needs_snapshot_support() {
    let engine = BatchEngine::new(Arc::new(CreateOnly));
    let batch = ops(json!([{"entityType": "requirement", "payload": {"title": "r"}}]));

    let err = engine
        .execute_batch("plan", batch.clone(), BatchOptions::atomic())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::AtomicUnsupported));

    let result = engine
        .execute_batch("plan", batch, BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(result.results[0].id.as_deref(), Some("fixed"));
}

/// Backend whose second create fails and whose snapshot cannot be written back
#[derive(Default)]
struct UnrestorableDisk {
    created: AtomicUsize,
    restores: AtomicUsize,
}

#[async_trait]
impl BatchBackend for UnrestorableDisk {
    async fn create(&self, _plan_id: &str, _draft: Draft) -> StoreResult<String> {
        match self.created.fetch_add(1, Ordering::SeqCst) {
            0 => Ok("r1".into()),
            _ => Err(StoreError::validation("second create rejected")),
        }
    }

    fn snapshots(&self) -> Option<&dyn SnapshotBackend> {
        Some(self)
    }
}

#[async_trait]
impl SnapshotBackend for UnrestorableDisk {
    async fn load_collections(&self, _plan_id: &str) -> StoreResult<PlanCollections> {
        Ok(PlanCollections::default())
    }

    async fn save_collections(&self, _plan_id: &str, _collections: &PlanCollections) -> StoreResult<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::validation("disk full"))
    }
}

#[tokio::test]
async fn failed_restore_is_reported_alongside_the_cause() {
    let backend = Arc::new(UnrestorableDisk::default());
    let engine = BatchEngine::new(Arc::clone(&backend));

    let err = engine
        .execute_batch(
            "plan",
            ops(json!([
                {"entityType": "requirement", "payload": {"title": "first"}},
                {"entityType": "requirement", "payload": {"title": "second"}}
            ])),
            BatchOptions::atomic(),
        )
        .await
        .unwrap_err();

    let BatchError::AtomicRollback {
        index,
        entity_type,
        ref cause,
        rollback_error: Some(ref rollback_error),
    } = err
    else {
        panic!("expected a rollback with a restore failure, got {err:?}");
    };
    assert_eq!((index, entity_type), (1, "requirement"));
    assert!(cause.to_string().contains("second create rejected"));
    assert!(rollback_error.to_string().contains("disk full"));
    assert_eq!(backend.restores.load(Ordering::SeqCst), 1);

    let text = err.to_string();
    assert!(text.contains("second create rejected"), "{text}");
    assert!(text.contains("disk full"), "{text}");
}
