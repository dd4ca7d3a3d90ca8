//! Lock manager: in-process FIFO queues over cross-process lock artifacts

use crate::config::{AcquireOptions, LockConfig};
use crate::error::LockError;
use crate::file_lock::{self, Attempt, FileLock};
use crate::record::{lock_file_name, LockRecord};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Named mutual exclusion across tasks and processes
///
/// Cheap to clone; clones share the holder table, queues and lifecycle.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

struct Inner {
    lock_dir: PathBuf,
    config: LockConfig,
    instance_id: String,
    /// One FIFO queue per resource name
    queues: DashMap<String, Arc<Mutex<()>>>,
    /// Locks held through this manager
    held: parking_lot::Mutex<HashMap<String, HeldLock>>,
    disposed: AtomicBool,
    shutdown: watch::Sender<bool>,
    in_flight: AtomicUsize,
    idle: Notify,
    /// Serializes `dispose`; `true` once it has completed
    dispose_gate: Mutex<bool>,
}

struct HeldLock {
    holder: String,
    ref_count: usize,
    file: FileLock,
    queue_guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
}

impl LockManager {
    /// Create a manager whose lock artifacts live in `lock_dir`
    #[must_use]
    pub fn new(lock_dir: impl Into<PathBuf>, config: LockConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                lock_dir: lock_dir.into(),
                config,
                instance_id: format!("lock-manager-{}", uuid::Uuid::new_v4()),
                queues: DashMap::new(),
                held: parking_lot::Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                shutdown,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                dispose_gate: Mutex::new(false),
            }),
        }
    }

    /// Create the lock directory
    pub async fn initialize(&self) -> Result<(), LockError> {
        if self.is_disposed() {
            return Err(LockError::Disposed {
                resource: self.inner.lock_dir.display().to_string(),
            });
        }
        tokio::fs::create_dir_all(&self.inner.lock_dir)
            .await
            .map_err(|e| LockError::io(&self.inner.lock_dir, e))?;
        info!(lock_dir = %self.inner.lock_dir.display(), instance = %self.inner.instance_id, "lock manager initialized");
        Ok(())
    }

    /// Directory holding the lock artifacts
    #[inline]
    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.inner.lock_dir
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Holder identity used when [`AcquireOptions::holder`] is unset
    #[inline]
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Check if `dispose` has started
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of resources currently held through this manager
    #[must_use]
    pub fn active_locks_count(&self) -> usize {
        self.inner.held.lock().len()
    }

    /// Check if `resource` is held, here or by a live artifact on disk
    #[must_use]
    pub fn is_locked(&self, resource: &str) -> bool {
        if self.inner.held.lock().contains_key(resource) {
            return true;
        }
        matches!(
            file_lock::observe(&self.inner.lock_path(resource), self.inner.config.stale_threshold()),
            Ok(Some(observed)) if !observed.stale
        )
    }

    /// Acquire `resource`
    ///
    /// Waits in the resource's FIFO queue, then polls the lock artifact with
    /// capped exponential backoff until it is created, the time budget runs
    /// out ([`LockError::Timeout`]) or the attempt cap is reached
    /// ([`LockError::MaxRetriesExceeded`]). A stale artifact is taken over.
    pub async fn acquire(&self, resource: &str, options: AcquireOptions) -> Result<LockGuard, LockError> {
        if resource.trim().is_empty() {
            return Err(LockError::InvalidResource(resource.to_string()));
        }
        let _in_flight = InFlight::enter(&self.inner);
        if self.is_disposed() {
            return Err(LockError::Disposed {
                resource: resource.to_string(),
            });
        }

        let holder = options
            .holder
            .unwrap_or_else(|| self.inner.instance_id.clone());

        if options.reentrant && self.inner.try_reenter(resource, &holder) {
            return Ok(LockGuard::new(Arc::clone(&self.inner), resource, holder));
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.acquire_timeout());
        let max_retries = options
            .max_retries
            .unwrap_or(self.inner.config.max_retries)
            .max(1);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut shutdown = self.inner.shutdown.subscribe();

        let queue = self.inner.queue(resource);
        let queue_guard = tokio::select! {
            biased;
            () = disposed_signal(&mut shutdown) => {
                return Err(LockError::Disposed { resource: resource.to_string() });
            }
            locked = tokio::time::timeout_at(deadline, queue.lock_owned()) => match locked {
                Ok(guard) => guard,
                Err(_) => {
                    self.inner.prune_queue(resource);
                    return Err(LockError::Timeout {
                        resource: resource.to_string(),
                        waited_ms: elapsed_ms(started),
                    });
                }
            },
        };

        let file = self
            .inner
            .acquire_file(resource, &holder, started, deadline, max_retries, &mut shutdown)
            .await;
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                drop(queue_guard);
                self.inner.prune_queue(resource);
                return Err(err);
            }
        };

        if let Err(file) = self.inner.commit(resource, &holder, file, queue_guard) {
            let path = self.inner.lock_path(resource);
            if let Err(err) = blocking(&path, move || file.release()).await {
                warn!(resource, error = %err, "failed to release lock acquired during dispose");
            }
            return Err(LockError::Disposed {
                resource: resource.to_string(),
            });
        }
        Ok(LockGuard::new(Arc::clone(&self.inner), resource, holder))
    }

    /// Run `f` while holding `resource`
    ///
    /// The lock is released whatever `f` returns. A failed release is logged
    /// and does not replace the result of `f`.
    pub async fn with_lock<F, Fut, T, E>(&self, resource: &str, options: AcquireOptions, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(resource, options).await?;
        let result = f().await;
        if let Err(err) = guard.release().await {
            warn!(resource, error = %err, "lock release after critical section failed");
        }
        result
    }

    /// Stop accepting acquisitions and release everything held
    ///
    /// Waiters fail with [`LockError::Disposed`]. In-flight acquisitions are
    /// given up to `dispose_timeout` to settle before held locks are released
    /// and the queues torn down. Calling it again is a no-op.
    pub async fn dispose(&self) {
        let mut done = self.inner.dispose_gate.lock().await;
        if *done {
            return;
        }

        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
        info!(instance = %self.inner.instance_id, "disposing lock manager");

        let drain = self.inner.config.dispose_timeout();
        if tokio::time::timeout(drain, self.inner.wait_idle()).await.is_err() {
            warn!(
                in_flight = self.inner.in_flight.load(Ordering::SeqCst),
                timeout_ms = self.inner.config.dispose_timeout_ms,
                "dispose timed out waiting for in-flight acquisitions"
            );
        }

        let held: Vec<(String, HeldLock)> = self.inner.held.lock().drain().collect();
        let released = held.len();
        for (resource, entry) in held {
            let _ = self.inner.finish(&resource, entry).await;
        }
        self.inner.queues.clear();

        *done = true;
        info!(released, "lock manager disposed");
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_dir", &self.inner.lock_dir)
            .field("instance_id", &self.inner.instance_id)
            .field("active_locks", &self.active_locks_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_path(&self, resource: &str) -> PathBuf {
        self.lock_dir.join(lock_file_name(resource))
    }

    fn queue(&self, resource: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.queues
                .entry(resource.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the queue for `resource` once nobody holds or awaits it
    fn prune_queue(&self, resource: &str) {
        self.queues
            .remove_if(resource, |_, queue| Arc::strong_count(queue) == 1);
    }

    fn try_reenter(&self, resource: &str, holder: &str) -> bool {
        let mut held = self.held.lock();
        match held.get_mut(resource) {
            Some(entry) if entry.holder == holder => {
                entry.ref_count += 1;
                debug!(resource, holder, ref_count = entry.ref_count, "reentrant lock acquisition");
                true
            }
            _ => false,
        }
    }

    async fn acquire_file(
        &self,
        resource: &str,
        holder: &str,
        started: Instant,
        deadline: Instant,
        max_retries: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<FileLock, LockError> {
        let path = self.lock_path(resource);
        let stale_threshold = self.config.stale_threshold();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let record = LockRecord::new(resource, holder);
            let target = path.clone();
            let attempt = blocking(&path, move || FileLock::try_acquire(&target, record, stale_threshold)).await?;
            let retry_now = match attempt {
                Attempt::Acquired(file) => {
                    debug!(resource, holder, attempts, pid = file.record().pid, "lock artifact created");
                    return Ok(file);
                }
                Attempt::Busy => false,
                Attempt::Stale(observed) => {
                    warn!(
                        resource,
                        holder,
                        previous_holder = %observed.holder_summary(),
                        age_ms = u64::try_from(observed.age.as_millis()).unwrap_or(u64::MAX),
                        "taking over stale lock"
                    );
                    let target = path.clone();
                    blocking(&path, move || file_lock::break_stale(&target, &observed, stale_threshold)).await?
                }
            };

            if attempts >= max_retries {
                return Err(LockError::MaxRetriesExceeded {
                    resource: resource.to_string(),
                    attempts,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited_ms: elapsed_ms(started),
                });
            }
            if retry_now {
                continue;
            }

            let delay = self.config.backoff(attempts).min(deadline - now);
            tokio::select! {
                biased;
                () = disposed_signal(shutdown) => {
                    return Err(LockError::Disposed { resource: resource.to_string() });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Record a fresh acquisition; hands the artifact back once disposed
    fn commit(
        &self,
        resource: &str,
        holder: &str,
        file: FileLock,
        queue_guard: OwnedMutexGuard<()>,
    ) -> Result<(), FileLock> {
        let mut held = self.held.lock();
        if self.disposed.load(Ordering::SeqCst) {
            drop(held);
            drop(queue_guard);
            return Err(file);
        }

        held.insert(
            resource.to_string(),
            HeldLock {
                holder: holder.to_string(),
                ref_count: 1,
                file,
                queue_guard,
                acquired_at: Instant::now(),
            },
        );
        debug!(resource, holder, "lock acquired");
        Ok(())
    }

    /// Drop one reference; yields the entry once the last one is gone
    fn take(&self, resource: &str, holder: &str) -> Result<Option<HeldLock>, LockError> {
        let mut held = self.held.lock();
        match held.get_mut(resource) {
            Some(entry) if entry.holder == holder => {
                if entry.ref_count > 1 {
                    entry.ref_count -= 1;
                    debug!(resource, holder, ref_count = entry.ref_count, "reentrant lock released");
                    return Ok(None);
                }
            }
            // Dispose already released everything
            _ if self.disposed.load(Ordering::SeqCst) => return Ok(None),
            _ => {
                return Err(LockError::NotHeld {
                    resource: resource.to_string(),
                    holder: holder.to_string(),
                })
            }
        }
        Ok(held.remove(resource))
    }

    async fn release(&self, resource: &str, holder: &str) -> Result<(), LockError> {
        match self.take(resource, holder)? {
            Some(entry) => self.finish(resource, entry).await,
            None => Ok(()),
        }
    }

    /// Synchronous release for `Drop`
    fn release_now(&self, resource: &str, holder: &str) -> Result<(), LockError> {
        match self.take(resource, holder)? {
            Some(entry) => {
                let HeldLock {
                    holder,
                    file,
                    queue_guard,
                    acquired_at,
                    ..
                } = entry;
                let result = file.release();
                self.settle(resource, &holder, queue_guard, acquired_at, result)
            }
            None => Ok(()),
        }
    }

    /// Remove the artifact, then let the next queued waiter in
    async fn finish(&self, resource: &str, entry: HeldLock) -> Result<(), LockError> {
        let HeldLock {
            holder,
            file,
            queue_guard,
            acquired_at,
            ..
        } = entry;

        let result = blocking(&self.lock_path(resource), move || file.release()).await;
        self.settle(resource, &holder, queue_guard, acquired_at, result)
    }

    fn settle(
        &self,
        resource: &str,
        holder: &str,
        queue_guard: OwnedMutexGuard<()>,
        acquired_at: Instant,
        result: Result<(), LockError>,
    ) -> Result<(), LockError> {
        drop(queue_guard);
        self.prune_queue(resource);

        match &result {
            Ok(()) => debug!(
                resource,
                holder = %holder,
                held_ms = elapsed_ms(acquired_at),
                "lock released"
            ),
            Err(err @ LockError::ExternallyReleased { .. }) => {
                warn!(resource, holder = %holder, error = %err, "lock artifact was removed or replaced while held");
            }
            Err(err) => warn!(resource, holder = %holder, error = %err, "failed to release lock artifact"),
        }
        result
    }

    async fn extend(&self, resource: &str, holder: &str) -> Result<(), LockError> {
        let renewal = match self.held.lock().get(resource) {
            Some(entry) if entry.holder == holder => entry.file.renewal(),
            _ => {
                return Err(LockError::NotHeld {
                    resource: resource.to_string(),
                    holder: holder.to_string(),
                })
            }
        };
        let record = blocking(&self.lock_path(resource), move || renewal.run()).await?;
        if let Some(entry) = self.held.lock().get_mut(resource) {
            entry.file.renewed(record);
        }
        debug!(resource, holder, "lock extended");
        Ok(())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (resource, entry) in self.held.get_mut().drain() {
            if let Err(err) = entry.file.release() {
                debug!(resource, error = %err, "lock artifact not removed on drop");
            }
        }
    }
}

/// Counts an acquisition as in flight until dropped
struct InFlight<'a> {
    inner: &'a Inner,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Resolves once dispose has been signalled
async fn disposed_signal(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|disposed| *disposed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run artifact I/O on the blocking pool
async fn blocking<T, F>(path: &Path, f: F) -> Result<T, LockError>
where
    F: FnOnce() -> Result<T, LockError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LockError::io(path, std::io::Error::other(e)))?
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// A held lock
///
/// Release explicitly with [`LockGuard::release`] to observe errors; dropping
/// the guard releases it best-effort.
pub struct LockGuard {
    inner: Arc<Inner>,
    resource: String,
    holder: String,
    released: bool,
}

impl LockGuard {
    fn new(inner: Arc<Inner>, resource: &str, holder: String) -> Self {
        Self {
            inner,
            resource: resource.to_string(),
            holder,
            released: false,
        }
    }

    /// Locked resource name
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Holder identity
    #[inline]
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Renew the lock so it does not go stale
    pub async fn extend(&self) -> Result<(), LockError> {
        self.inner.extend(&self.resource, &self.holder).await
    }

    /// Release this acquisition
    ///
    /// For a reentrant lock only the final release frees the resource.
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.inner.release(&self.resource, &self.holder).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.inner.release_now(&self.resource, &self.holder);
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
