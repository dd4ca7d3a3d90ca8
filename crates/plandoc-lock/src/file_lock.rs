//! Cross-process layer: one lock artifact per resource
//!
//! An artifact is created with `create_new` (O_EXCL) and kept open under an
//! fs2 exclusive advisory lock for as long as it is held. Contenders never
//! block on the OS lock; they observe the artifact, retry, and take it over
//! once it has gone unrenewed past the stale threshold.

use crate::error::LockError;
use crate::record::{decode_resource, LockRecord};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A held lock artifact
#[derive(Debug)]
pub(crate) struct FileLock {
    file: Arc<File>,
    path: PathBuf,
    record: LockRecord,
}

/// What an existing artifact looks like to a contender
#[derive(Debug, Clone)]
pub(crate) struct Observed {
    /// Parsed contents, `None` when unreadable (crash mid-write)
    pub(crate) record: Option<LockRecord>,
    /// Time since last renewal (or file mtime when unreadable)
    pub(crate) age: Duration,
    /// Whether the artifact may be taken over
    pub(crate) stale: bool,
}

impl Observed {
    pub(crate) fn holder_summary(&self) -> String {
        self.record
            .as_ref()
            .map_or_else(|| "unknown holder".to_string(), LockRecord::display_summary)
    }
}

/// Outcome of one acquisition attempt
#[derive(Debug)]
pub(crate) enum Attempt {
    Acquired(FileLock),
    Busy,
    Stale(Observed),
}

/// Everything needed to renew a held artifact away from its owner
#[derive(Debug)]
pub(crate) struct Renewal {
    file: Arc<File>,
    path: PathBuf,
    record: LockRecord,
}

impl Renewal {
    /// Rewrite the artifact with a fresh `renewed_at`
    pub(crate) fn run(self) -> Result<LockRecord, LockError> {
        verify_owned(&self.path, &self.record)?;
        let mut renewed = self.record;
        renewed.renewed_at = Utc::now();
        write_record(&self.file, &renewed).map_err(|e| LockError::io(&self.path, e))?;
        Ok(renewed)
    }
}

impl FileLock {
    /// Make one attempt at creating the artifact at `path`
    pub(crate) fn try_acquire(
        path: &Path,
        record: LockRecord,
        stale_threshold: Duration,
    ) -> Result<Attempt, LockError> {
        let file = match create_exclusive(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return match observe(path, stale_threshold) {
                    Ok(Some(observed)) if observed.stale => Ok(Attempt::Stale(observed)),
                    Ok(_) => Ok(Attempt::Busy),
                    Err(e) => Err(LockError::io(path, e)),
                };
            }
            Err(e) => return Err(LockError::io(path, e)),
        };

        // A contender inspecting the fresh artifact got the OS lock first
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            let _ = fs::remove_file(path);
            if e.kind() == ErrorKind::WouldBlock {
                return Ok(Attempt::Busy);
            }
            return Err(LockError::io(path, e));
        }

        if let Err(e) = write_record(&file, &record) {
            let _ = fs::remove_file(path);
            let _ = FileExt::unlock(&file);
            return Err(LockError::io(path, e));
        }

        Ok(Attempt::Acquired(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            record,
        }))
    }

    /// Holder recorded in the artifact
    pub(crate) fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Detached renewal of this artifact
    pub(crate) fn renewal(&self) -> Renewal {
        Renewal {
            file: Arc::clone(&self.file),
            path: self.path.clone(),
            record: self.record.clone(),
        }
    }

    /// Adopt the record written by a completed [`Renewal`]
    pub(crate) fn renewed(&mut self, record: LockRecord) {
        if record.token == self.record.token {
            self.record = record;
        }
    }

    /// Remove the artifact if it is still ours
    ///
    /// When the artifact vanished or now carries another token the lock was
    /// taken over; the foreign artifact is left in place and
    /// [`LockError::ExternallyReleased`] is returned. The OS lock is dropped
    /// only after the artifact is gone.
    pub(crate) fn release(self) -> Result<(), LockError> {
        let result = verify_owned(&self.path, &self.record).and_then(|()| {
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(externally_released(&self.record)),
                Err(e) => Err(LockError::io(&self.path, e)),
            }
        });
        let _ = FileExt::unlock(&*self.file);
        result
    }
}

fn verify_owned(path: &Path, record: &LockRecord) -> Result<(), LockError> {
    match read_record(path) {
        Ok(Some(current)) if current.token == record.token => Ok(()),
        Ok(_) => Err(externally_released(record)),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(externally_released(record)),
        Err(e) => Err(LockError::io(path, e)),
    }
}

fn externally_released(record: &LockRecord) -> LockError {
    LockError::ExternallyReleased {
        resource: record.resource.clone(),
        holder: record.holder.clone(),
    }
}

fn create_exclusive(path: &Path) -> std::io::Result<File> {
    let open = || OpenOptions::new().read(true).write(true).create_new(true).open(path);
    match open() {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            open()
        }
        other => other,
    }
}

fn write_record(mut file: &File, record: &LockRecord) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.sync_all()
}

fn parse_record(bytes: &[u8]) -> Option<LockRecord> {
    serde_json::from_slice(bytes).ok()
}

/// Read and parse an artifact; `Ok(None)` when it exists but is unreadable
pub(crate) fn read_record(path: &Path) -> std::io::Result<Option<LockRecord>> {
    Ok(parse_record(&fs::read(path)?))
}

fn age_of(record: Option<&LockRecord>, metadata: &Metadata) -> Duration {
    match record {
        Some(record) => record.age(Utc::now()),
        None => metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO),
    }
}

/// Inspect the artifact at `path`; `Ok(None)` when there is none
pub(crate) fn observe(path: &Path, stale_threshold: Duration) -> std::io::Result<Option<Observed>> {
    let record = match read_record(path) {
        Ok(record) => record,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let age = match &record {
        Some(record) => record.age(Utc::now()),
        None => match fs::metadata(path) {
            Ok(metadata) => age_of(None, &metadata),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        },
    };

    Ok(Some(Observed {
        record,
        age,
        stale: age > stale_threshold,
    }))
}

/// Remove a stale artifact, provided it is still the one that was observed
///
/// Returns `true` when the path is free for a new attempt. The artifact is
/// only removed while this process holds its OS lock, which a live holder
/// never gives up.
pub(crate) fn break_stale(path: &Path, observed: &Observed, stale_threshold: Duration) -> Result<bool, LockError> {
    match File::open(path) {
        Ok(file) => break_locked(path, &file, observed, stale_threshold),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(LockError::io(path, e)),
    }
}

fn break_locked(path: &Path, file: &File, observed: &Observed, stale_threshold: Duration) -> Result<bool, LockError> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
        Err(e) => return Err(LockError::io(path, e)),
    }
    let result = remove_if_unchanged(path, file, observed, stale_threshold);
    let _ = FileExt::unlock(file);
    result
}

fn remove_if_unchanged(
    path: &Path,
    mut file: &File,
    observed: &Observed,
    stale_threshold: Duration,
) -> Result<bool, LockError> {
    let io = |e| LockError::io(path, e);

    let locked = file.metadata().map_err(io)?;
    let current = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(io(e)),
    };
    // Someone already replaced the artifact we opened
    if !same_file(&locked, &current) {
        return Ok(false);
    }

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(io)?;
    let record = parse_record(&bytes);
    let unchanged = match (&record, &observed.record) {
        (Some(current), Some(seen)) => current.token == seen.token,
        (None, None) => true,
        _ => false,
    };
    if !unchanged || age_of(record.as_ref(), &locked) <= stale_threshold {
        return Ok(false);
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(io(e)),
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_: &Metadata, _: &Metadata) -> bool {
    true
}

/// One artifact found by [`scan_lock_dir`]
#[derive(Debug, Clone)]
pub struct LockStatus {
    /// Decoded resource name
    pub resource: String,
    /// Artifact path
    pub path: PathBuf,
    /// Parsed artifact, `None` when unreadable
    pub record: Option<LockRecord>,
    /// Time since last renewal
    pub age: Duration,
    /// Whether a contender would take it over
    pub stale: bool,
}

/// List every lock artifact in `lock_dir`
///
/// A missing directory yields an empty list.
pub fn scan_lock_dir(lock_dir: &Path, stale_threshold: Duration) -> Result<Vec<LockStatus>, LockError> {
    let entries = match fs::read_dir(lock_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LockError::io(lock_dir, e)),
    };

    let mut statuses = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LockError::io(lock_dir, e))?;
        let path = entry.path();
        let Some(stem) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".lock"))
        else {
            continue;
        };
        let Some(resource) = decode_resource(stem) else {
            continue;
        };
        if let Some(observed) = observe(&path, stale_threshold).map_err(|e| LockError::io(&path, e))? {
            statuses.push(LockStatus {
                resource,
                path,
                record: observed.record,
                age: observed.age,
                stale: observed.stale,
            });
        }
    }
    statuses.sort_by(|a, b| a.resource.cmp(&b.resource));
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn acquired(attempt: Attempt) -> FileLock {
        match attempt {
            Attempt::Acquired(lock) => lock,
            other => panic!("expected acquisition, got {other:?}"),
        }
    }

    #[test]
    fn second_attempt_sees_busy_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");

        let first = acquired(
            FileLock::try_acquire(&path, LockRecord::new("r", "a"), Duration::from_secs(30)).unwrap(),
        );
        let second =
            FileLock::try_acquire(&path, LockRecord::new("r", "b"), Duration::from_secs(30)).unwrap();
        assert!(matches!(second, Attempt::Busy));

        first.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_parent_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".locks").join("r.lock");

        let lock = acquired(
            FileLock::try_acquire(&path, LockRecord::new("r", "a"), Duration::from_secs(30)).unwrap(),
        );
        assert_eq!(read_record(&path).unwrap().unwrap().holder, "a");
        lock.release().unwrap();
    }

    /// Lock file left behind by a process that died, `age` ago
    fn abandoned_artifact(path: &Path, age: Duration) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn stale_artifact_is_reported_and_breakable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");
        let old = acquired(
            FileLock::try_acquire(&path, LockRecord::new("r", "old"), Duration::from_secs(30)).unwrap(),
        );
        std::thread::sleep(Duration::from_millis(5));

        let attempt = FileLock::try_acquire(&path, LockRecord::new("r", "new"), Duration::ZERO).unwrap();
        let Attempt::Stale(observed) = attempt else {
            panic!("expected stale artifact");
        };
        assert!(observed.holder_summary().starts_with("old"));

        // live holder keeps its OS lock
        assert!(!break_stale(&path, &observed, Duration::ZERO).unwrap());

        // holder process gone
        FileExt::unlock(&*old.file).unwrap();
        assert!(break_stale(&path, &observed, Duration::ZERO).unwrap());

        let new = acquired(
            FileLock::try_acquire(&path, LockRecord::new("r", "new"), Duration::from_secs(30)).unwrap(),
        );

        let err = old.release().unwrap_err();
        assert!(matches!(err, LockError::ExternallyReleased { .. }));
        assert!(path.exists(), "takeover artifact must survive the old release");
        new.release().unwrap();
    }

    #[test]
    fn late_contender_cannot_remove_fresh_takeover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");
        let threshold = Duration::from_secs(30);
        abandoned_artifact(&path, Duration::from_secs(600));

        let Attempt::Stale(seen_by_a) = FileLock::try_acquire(&path, LockRecord::new("r", "a"), threshold).unwrap()
        else {
            panic!("expected stale artifact");
        };
        let Attempt::Stale(seen_by_b) = FileLock::try_acquire(&path, LockRecord::new("r", "b"), threshold).unwrap()
        else {
            panic!("expected stale artifact");
        };

        assert!(break_stale(&path, &seen_by_b, threshold).unwrap());
        let b = acquired(FileLock::try_acquire(&path, LockRecord::new("r", "b"), threshold).unwrap());

        assert!(!break_stale(&path, &seen_by_a, threshold).unwrap());
        assert_eq!(read_record(&path).unwrap().unwrap().token, b.record().token);
        b.release().unwrap();
    }

    #[test]
    fn contender_holding_the_replaced_artifact_leaves_the_new_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");
        let threshold = Duration::from_secs(30);
        let mut stale = LockRecord::new("r", "crashed");
        stale.renewed_at = stale.renewed_at - chrono::Duration::seconds(600);
        fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let observed = observe(&path, threshold).unwrap().unwrap();
        assert!(observed.stale);
        // b opened the old artifact before a replaced it
        let opened_by_b = File::open(&path).unwrap();

        assert!(break_stale(&path, &observed, threshold).unwrap());
        let a = acquired(FileLock::try_acquire(&path, LockRecord::new("r", "a"), threshold).unwrap());

        assert!(!break_locked(&path, &opened_by_b, &observed, threshold).unwrap());
        assert_eq!(read_record(&path).unwrap().unwrap().holder, "a");
        a.release().unwrap();
    }

    #[test]
    fn renew_moves_renewal_time_forward() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");
        let mut lock = acquired(
            FileLock::try_acquire(&path, LockRecord::new("r", "a"), Duration::from_secs(30)).unwrap(),
        );
        let before = lock.record().renewed_at;

        std::thread::sleep(Duration::from_millis(5));
        let renewed = lock.renewal().run().unwrap();
        lock.renewed(renewed);

        let on_disk = read_record(&path).unwrap().unwrap();
        assert!(on_disk.renewed_at > before);
        assert_eq!(on_disk.renewed_at, lock.record().renewed_at);
        assert_eq!(on_disk.acquired_at, lock.record().acquired_at);
        lock.release().unwrap();
    }

    #[test]
    fn unreadable_artifact_ages_by_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.lock");
        fs::write(&path, b"").unwrap();

        let observed = observe(&path, Duration::from_secs(30)).unwrap().unwrap();
        assert!(observed.record.is_none());
        assert!(!observed.stale);
        assert_eq!(observed.holder_summary(), "unknown holder");
    }

    #[test]
    fn scan_lists_decoded_resources() {
        let dir = TempDir::new().unwrap();
        let a = acquired(
            FileLock::try_acquire(
                &dir.path().join(crate::lock_file_name("plan/a")),
                LockRecord::new("plan/a", "h"),
                Duration::from_secs(30),
            )
            .unwrap(),
        );
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let statuses = scan_lock_dir(dir.path(), Duration::from_secs(30)).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].resource, "plan/a");
        assert!(!statuses[0].stale);
        a.release().unwrap();

        assert!(scan_lock_dir(&dir.path().join("missing"), Duration::from_secs(1))
            .unwrap()
            .is_empty());
    }
}
