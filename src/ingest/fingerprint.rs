// src/ingest/fingerprint.rs
//! Persistent set of already-processed article keys.
//!
//! The map is guarded by a single `Mutex`; `check_and_record` holds it for
//! both the lookup and the insert, so overlapping ingestion cycles can never
//! both treat the same key as new.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const FILE_VERSION: u32 = 1;

/// Stable key for an article: SHA-256 of the normalized link, or of
/// `source + title` when the entry has no link.
pub fn fingerprint_key(link: &str, source_id: &str, title: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    let link = normalize_link(link);
    if link.is_empty() {
        hasher.update(source_id.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(title.trim().to_lowercase().as_bytes());
    } else {
        hasher.update(link.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn normalize_link(link: &str) -> String {
    let mut s = link.trim();
    if let Some(idx) = s.find('#') {
        s = &s[..idx];
    }
    s.trim_end_matches('/').to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FingerprintFile {
    version: u32,
    entries: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug)]
pub struct FingerprintStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    path: Option<PathBuf>,
}

impl FingerprintStore {
    /// Store without a backing file (tests, one-shot tools).
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Load from `path`. A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<FingerprintFile>(&s) {
                Ok(f) => f.entries,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "fingerprint file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        tracing::info!(count = entries.len(), path = %path.display(), "fingerprint store loaded");
        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A poisoned map is still a valid set of keys.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn has(&self, key: &str) -> bool {
        self.guard().contains_key(key)
    }

    /// Idempotent: recording an existing key keeps its first-seen time.
    pub fn record(&self, key: &str, ts: DateTime<Utc>) {
        self.guard().entry(key.to_string()).or_insert(ts);
    }

    /// Atomic `has`-then-`record`. Returns `true` if the key was new.
    pub fn check_and_record(&self, key: &str, ts: DateTime<Utc>) -> bool {
        let mut g = self.guard();
        if g.contains_key(key) {
            return false;
        }
        g.insert(key.to_string(), ts);
        true
    }

    /// Drop entries first seen before `older_than`. Returns how many were removed.
    pub fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let mut g = self.guard();
        let before = g.len();
        g.retain(|_, seen| *seen >= older_than);
        before - g.len()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current set to disk (temp file + rename). No-op when in-memory.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = FingerprintFile {
            version: FILE_VERSION,
            entries: self.guard().clone(),
        };
        write_json_atomic(path, &snapshot)
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    let json = serde_json::to_vec_pretty(value).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn key_ignores_fragment_and_trailing_slash() {
        let a = fingerprint_key("https://x.com/a/", "src", "T");
        let b = fingerprint_key(" https://x.com/a#top", "other", "different");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn key_without_link_uses_source_and_title() {
        let a = fingerprint_key("", "Pandaily", "Big News");
        let b = fingerprint_key("", "Pandaily", "big news ");
        let c = fingerprint_key("", "Other", "Big News");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn record_is_idempotent_and_keeps_first_seen() {
        let s = FingerprintStore::in_memory();
        s.record("k", t(1));
        s.record("k", t(5));
        assert!(s.has("k"));
        assert_eq!(s.len(), 1);
        // Pruning at day 3 removes it: the first-seen time (day 1) was kept.
        assert_eq!(s.prune(t(3)), 1);
        assert!(!s.has("k"));
    }

    #[test]
    fn check_and_record_only_once() {
        let s = FingerprintStore::in_memory();
        assert!(s.check_and_record("a", t(1)));
        assert!(!s.check_and_record("a", t(2)));
    }

    #[test]
    fn prune_keeps_recent() {
        let s = FingerprintStore::in_memory();
        s.record("old", t(1));
        s.record("new", t(20));
        let removed = s.prune(t(20) - Duration::days(5));
        assert_eq!(removed, 1);
        assert!(s.has("new"));
    }

    #[test]
    fn persisted_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("fingerprints.json");
        let s = FingerprintStore::open(&path);
        assert!(s.is_empty());
        s.record("abc", t(2));
        s.persist().unwrap();

        let reopened = FingerprintStore::open(&path);
        assert!(reopened.has("abc"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        fs::write(&path, "not json").unwrap();
        let s = FingerprintStore::open(&path);
        assert!(s.is_empty());
    }
}
