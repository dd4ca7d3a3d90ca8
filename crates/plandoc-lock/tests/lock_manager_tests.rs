//! Lock manager behaviour across tasks and manager instances

use plandoc_lock::{scan_lock_dir, AcquireOptions, LockConfig, LockError, LockFailureReason, LockManager, LockRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn config() -> LockConfig {
    LockConfig::default()
        .with_acquire_timeout(Duration::from_secs(5))
        .with_retry_interval(Duration::from_millis(2), Duration::from_millis(20))
}

#[tokio::test]
async fn second_manager_times_out_on_held_resource() {
    let dir = TempDir::new().unwrap();
    let a = LockManager::new(dir.path(), config());
    let b = LockManager::new(dir.path(), config());

    let guard = a.acquire("plan-1/requirements", AcquireOptions::new()).await.unwrap();
    assert!(b.is_locked("plan-1/requirements"));

    let started = Instant::now();
    let err = b
        .acquire(
            "plan-1/requirements",
            AcquireOptions::new().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert_eq!(err.reason(), LockFailureReason::Timeout);
    assert!(waited >= Duration::from_millis(90), "gave up too early: {waited:?}");
    assert!(waited < Duration::from_millis(1_000), "waited too long: {waited:?}");

    guard.release().await.unwrap();
    b.acquire("plan-1/requirements", AcquireOptions::new())
        .await
        .unwrap()
        .release()
        .await
        .unwrap();
}

#[tokio::test]
async fn attempt_cap_is_reported_separately() {
    let dir = TempDir::new().unwrap();
    let a = LockManager::new(dir.path(), config());
    let b = LockManager::new(dir.path(), config());
    let _guard = a.acquire("r", AcquireOptions::new()).await.unwrap();

    let err = b
        .acquire("r", AcquireOptions::new().max_retries(3))
        .await
        .unwrap_err();
    match err {
        LockError::MaxRetriesExceeded { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_sections_never_overlap() {
    let dir = TempDir::new().unwrap();
    let managers = [
        LockManager::new(dir.path(), config()),
        LockManager::new(dir.path(), config()),
    ];
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let locks = managers[i % 2].clone();
        let inside = Arc::clone(&inside);
        let entered = Arc::clone(&entered);
        tasks.push(tokio::spawn(async move {
            locks
                .with_lock("shared", AcquireOptions::new(), || async {
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "overlapping holders");
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    entered.fetch_add(1, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, LockError>(())
                })
                .await
        }));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn distinct_resources_do_not_wait_on_each_other() {
    let dir = TempDir::new().unwrap();
    let locks = LockManager::new(dir.path(), config());

    let a = locks.acquire("plan/a", AcquireOptions::new()).await.unwrap();
    let b = locks
        .acquire("plan/b", AcquireOptions::new().timeout(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(locks.active_locks_count(), 2);

    a.release().await.unwrap();
    b.release().await.unwrap();
}

#[tokio::test]
async fn stale_artifact_is_taken_over() {
    let dir = TempDir::new().unwrap();
    let mut record = LockRecord::new("r", "crashed-process");
    record.renewed_at = record.renewed_at - chrono::Duration::seconds(120);
    std::fs::write(dir.path().join("r.lock"), serde_json::to_vec(&record).unwrap()).unwrap();

    let locks = LockManager::new(dir.path(), config().with_stale_threshold(Duration::from_secs(60)));
    assert!(!locks.is_locked("r"));

    let guard = locks
        .acquire("r", AcquireOptions::new().holder("fresh").timeout(Duration::from_millis(200)))
        .await
        .unwrap();
    let statuses = scan_lock_dir(dir.path(), Duration::from_secs(60)).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].record.as_ref().unwrap().holder, "fresh");
    guard.release().await.unwrap();
}

#[tokio::test]
async fn externally_removed_artifact_fails_release() {
    let dir = TempDir::new().unwrap();
    let locks = LockManager::new(dir.path(), config());
    let guard = locks.acquire("r", AcquireOptions::new()).await.unwrap();

    std::fs::remove_file(dir.path().join("r.lock")).unwrap();

    let err = guard.release().await.unwrap_err();
    assert_eq!(err.reason(), LockFailureReason::ExternallyReleased);
    assert_eq!(locks.active_locks_count(), 0);
}

#[tokio::test]
async fn waiters_fail_with_disposed() {
    let dir = TempDir::new().unwrap();
    let locks = LockManager::new(dir.path(), config());
    let _held = locks.acquire("r", AcquireOptions::new().holder("a")).await.unwrap();

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move { locks.acquire("r", AcquireOptions::new().holder("b")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    locks.dispose().await;

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.reason(), LockFailureReason::Disposed);
    assert_eq!(locks.active_locks_count(), 0);
    assert!(scan_lock_dir(dir.path(), Duration::from_secs(60)).unwrap().is_empty());
}

#[tokio::test]
async fn with_lock_propagates_closure_error_and_releases() {
    #[derive(Debug)]
    enum AppError {
        Lock(LockError),
        Failed,
    }
    impl From<LockError> for AppError {
        fn from(err: LockError) -> Self {
            Self::Lock(err)
        }
    }

    let dir = TempDir::new().unwrap();
    let locks = LockManager::new(dir.path(), config());

    let result: Result<(), AppError> = locks
        .with_lock("r", AcquireOptions::new(), || async { Err(AppError::Failed) })
        .await;
    assert!(matches!(result, Err(AppError::Failed)));
    assert!(!locks.is_locked("r"));

    locks.dispose().await;
    let result: Result<(), AppError> = locks
        .with_lock("r", AcquireOptions::new(), || async { Ok(()) })
        .await;
    assert!(matches!(result, Err(AppError::Lock(LockError::Disposed { .. }))));
}
