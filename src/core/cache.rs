//! Per-file modification fingerprints used to skip re-inspecting unchanged files.
//!
//! The cache is advisory: losing it only costs extra reads, never correctness.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::Classification;

const CACHE_FORMAT_VERSION: u32 = 1;

/// Cheap change detector: last-modified time plus size.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: SystemTime,
    pub size: u64,
}

impl Fingerprint {
    /// Returns `None` if the platform cannot report a modification time.
    pub fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        Some(Self {
            modified: metadata.modified().ok()?,
            size: metadata.len(),
        })
    }
}

/// What the cache remembers about a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub classification: Classification,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: HashMap<PathBuf, CacheRecord>,
}

/// Mapping from absolute file path to its last-known fingerprint.
#[derive(Debug, Default, Clone)]
pub struct ModificationCache {
    entries: HashMap<PathBuf, CacheRecord>,
}

impl ModificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, path: &Path) -> Option<&CacheRecord> {
        self.entries.get(path)
    }

    pub fn update(&mut self, path: PathBuf, record: CacheRecord) {
        self.entries.insert(path, record);
    }

    /// `true` only if both timestamp and size match the cached fingerprint.
    pub fn is_unchanged(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.lookup(path)
            .is_some_and(|record| record.fingerprint == *fingerprint)
    }

    /// The cached classification for `path`, if its fingerprint still matches.
    pub fn classification_if_unchanged(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Option<Classification> {
        self.lookup(path)
            .filter(|record| record.fingerprint == *fingerprint)
            .map(|record| record.classification)
    }

    /// Drops entries under `root` that were not `seen` by the latest scan and
    /// whose file no longer exists.
    pub fn retain_existing(&mut self, root: &Path, seen: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| {
            !path.starts_with(root) || seen.contains(path) || path.symlink_metadata().is_ok()
        });
        before - self.entries.len()
    }

    /// Forgets every entry under `root`.
    pub fn invalidate_root(&mut self, root: &Path) {
        self.entries.retain(|path, _| !path.starts_with(root));
    }

    /// A copy holding only the entries under `root`.
    pub fn for_root(&self, root: &Path) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| path.starts_with(root))
                .map(|(path, record)| (path.clone(), *record))
                .collect(),
        }
    }

    /// Copies every entry of `other` into this cache, replacing existing ones.
    pub fn merge(&mut self, other: &ModificationCache) {
        self.entries
            .extend(other.entries.iter().map(|(path, record)| (path.clone(), *record)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a cache written by [`save_to`](Self::save_to).
    ///
    /// A missing, corrupt or outdated file yields an empty cache.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not read cache file {:?}: {}. Ignoring cache.", path, e);
                }
                return Self::new();
            }
        };

        match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) if file.version == CACHE_FORMAT_VERSION => {
                tracing::info!(
                    "Loaded {} cache entries from {:?} (saved {})",
                    file.entries.len(),
                    path,
                    file.saved_at
                );
                Self {
                    entries: file.entries,
                }
            }
            Ok(file) => {
                tracing::warn!(
                    "Cache file {:?} has version {}, expected {}. Ignoring cache.",
                    path,
                    file.version,
                    CACHE_FORMAT_VERSION
                );
                Self::new()
            }
            Err(e) => {
                tracing::warn!("Cache file {:?} is corrupted: {}. Ignoring cache.", path, e);
                Self::new()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            saved_at: Utc::now(),
            entries: self.entries.clone(),
        };
        fs::write(path, serde_json::to_string(&file)?)?;
        tracing::debug!("Saved {} cache entries to {:?}", self.entries.len(), path);
        Ok(())
    }
}
