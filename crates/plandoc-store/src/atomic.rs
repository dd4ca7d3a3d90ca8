//! All-or-nothing JSON file replacement
//!
//! A write serializes into a uniquely named temp file beside the target,
//! checks the bytes on disk parse back, then renames over the target. The
//! target is either fully replaced or left untouched.

use crate::config::AtomicWriteConfig;
use crate::error::{StoreError, StoreResult};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[cfg(windows)]
const BUSY_OS_ERRORS: &[i32] = &[5, 32, 33];
#[cfg(not(windows))]
const BUSY_OS_ERRORS: &[i32] = &[16, 26];

/// Atomic JSON reader/writer
#[derive(Debug, Clone, Default)]
pub struct AtomicStore {
    config: AtomicWriteConfig,
}

impl AtomicStore {
    /// Create store with the given tuning
    #[inline]
    #[must_use]
    pub fn new(config: AtomicWriteConfig) -> Self {
        Self { config }
    }

    /// Active tuning
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AtomicWriteConfig {
        &self.config
    }

    /// Replace `path` with `value` serialized as JSON
    pub async fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> StoreResult<()> {
        self.stage(path, value).await?.commit().await
    }

    /// Write `value` to a temp file beside `path` without touching `path`
    ///
    /// The returned [`StagedWrite`] removes its temp file when dropped
    /// uncommitted.
    pub async fn stage<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> StoreResult<StagedWrite> {
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::storage(parent, e))?;

        let temp = temp_path(path);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await
            .map_err(|e| StoreError::storage(&temp, e))?;
        let staged = StagedWrite {
            temp: Some(temp.clone()),
            target: path.to_path_buf(),
            config: self.config.clone(),
        };

        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::storage(&temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::storage(&temp, e))?;
        drop(file);

        let written = tokio::fs::read(&temp)
            .await
            .map_err(|e| StoreError::storage(&temp, e))?;
        if written != bytes {
            return Err(StoreError::storage(
                &temp,
                std::io::Error::new(ErrorKind::InvalidData, "temp file contents differ from serialized value"),
            ));
        }
        parse_json::<IgnoredAny>(&temp, &written)?;

        Ok(staged)
    }

    /// Read and parse `path`; a missing file is [`StoreError::NotFound`]
    pub async fn read<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<T> {
        self.read_optional(path)
            .await?
            .ok_or_else(|| StoreError::not_found("file", path.display().to_string()))
    }

    /// Read and parse `path`, `None` when it does not exist
    pub async fn read_optional<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => parse_json(path, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::storage(path, e)),
        }
    }

    /// Check if `path` exists
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// A serialized value waiting in its temp file
#[derive(Debug)]
pub struct StagedWrite {
    temp: Option<PathBuf>,
    target: PathBuf,
    config: AtomicWriteConfig,
}

impl StagedWrite {
    /// File that `commit` replaces
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Temp file holding the staged bytes
    #[inline]
    #[must_use]
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_deref()
    }

    /// Rename the temp file over the target
    ///
    /// Only the rename is retried, and only on transient busy errors, for at
    /// most `rename_retry_timeout_ms`.
    pub async fn commit(mut self) -> StoreResult<()> {
        let Some(temp) = self.temp.clone() else {
            return Ok(());
        };

        let started = Instant::now();
        let budget = self.config.rename_retry_timeout();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match tokio::fs::rename(&temp, &self.target).await {
                Ok(()) => {
                    self.temp = None;
                    debug!(path = %self.target.display(), attempts, "atomic write committed");
                    return Ok(());
                }
                Err(e) if is_busy(&e) && started.elapsed() < budget => {
                    debug!(path = %self.target.display(), attempts, error = %e, "target busy, retrying rename");
                    tokio::time::sleep(self.config.rename_retry_interval()).await;
                }
                Err(e) => {
                    warn!(path = %self.target.display(), attempts, error = %e, "atomic write failed");
                    return Err(StoreError::storage(&self.target, e));
                }
            }
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            if let Err(e) = std::fs::remove_file(&temp) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

fn is_busy(e: &std::io::Error) -> bool {
    (cfg!(windows) && e.kind() == ErrorKind::PermissionDenied)
        || e.raw_os_error().is_some_and(|code| BUSY_OS_ERRORS.contains(&code))
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "data".into(), |n| n.to_string_lossy().into_owned());
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    target.with_file_name(format!(
        ".{name}.{}.{counter}.{}.tmp",
        std::process::id(),
        &random[..8]
    ))
}

/// Parse persisted JSON, reporting where it is malformed
///
/// Empty or whitespace-only content is a validation error of its own.
pub fn parse_json<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> StoreResult<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(StoreError::validation(format!(
            "{} is empty; expected a JSON document",
            path.display()
        )));
    }
    serde_json::from_slice(bytes).map_err(|e| {
        let (line, column) = (e.line(), e.column());
        StoreError::MalformedJson {
            path: path.to_path_buf(),
            offset: byte_offset(bytes, line, column),
            line,
            column,
            message: e.to_string(),
        }
    })
}

/// Byte offset of a 1-based line/column position
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> usize {
    let line_start: usize = bytes
        .split_inclusive(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(<[u8]>::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(bytes.len())
}
