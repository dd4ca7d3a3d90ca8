//! Lock artifact contents and resource-name encoding

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// Contents of one lock artifact
///
/// `token` is unique per acquisition; a release only removes the artifact
/// when the token on disk still matches the one it wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Resource name
    pub resource: String,
    /// Holder identity
    pub holder: String,
    /// Process that wrote the artifact
    pub pid: u32,
    /// Per-acquisition token
    pub token: String,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
    /// Last renewal (equals `acquired_at` until extended)
    pub renewed_at: DateTime<Utc>,
}

impl LockRecord {
    /// Fresh record for the current process
    #[must_use]
    pub fn new(resource: impl Into<String>, holder: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            resource: resource.into(),
            holder: holder.into(),
            pid: std::process::id(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            renewed_at: now,
        }
    }

    /// Time since the last renewal
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.renewed_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Check if the record went unrenewed for longer than `threshold`
    #[inline]
    #[must_use]
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > threshold
    }

    /// Format for log lines and error messages
    #[must_use]
    pub fn display_summary(&self) -> String {
        format!(
            "{} (pid {}, acquired {})",
            self.holder,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Encode a resource name into a collision-free file stem
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`, so `a/b` and `a_b` never
/// share an artifact.
#[must_use]
pub fn encode_resource(resource: &str) -> String {
    let mut out = String::with_capacity(resource.len());
    for byte in resource.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

/// Lock artifact file name for a resource
#[inline]
#[must_use]
pub fn lock_file_name(resource: &str) -> String {
    format!("{}.lock", encode_resource(resource))
}

/// Decode a file stem produced by [`encode_resource`]
pub(crate) fn decode_resource(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
