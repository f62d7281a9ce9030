use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use super::cache::{CacheRecord, Fingerprint, ModificationCache};
use super::error::{CoreError, ScanError, ScanErrorReason};
use super::ignore::IgnoreRuleSet;
use super::{Classification, FileEntry, IgnoredPath, ScanProgress, ScanReport};
use crate::config::CoreConfig;
use crate::utils::file_detection::{extension_hint, sniff_file};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub sniff_bytes: usize,
    pub progress_interval: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

impl From<&CoreConfig> for ScanOptions {
    fn from(config: &CoreConfig) -> Self {
        Self {
            sniff_bytes: config.sniff_bytes,
            progress_interval: config.progress_interval.max(1),
        }
    }
}

/// Walks a project tree and produces the ordered candidate file list.
pub struct ScanEngine {
    options: ScanOptions,
}

impl ScanEngine {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Checks that `root` is a readable directory and returns its canonical form.
    pub fn validate_root(root: &Path) -> Result<PathBuf, ScanError> {
        let metadata = fs::metadata(root).map_err(|e| ScanError::from_io(root, &e))?;
        if !metadata.is_dir() {
            return Err(ScanError::new(root, ScanErrorReason::NotADirectory));
        }
        fs::read_dir(root).map_err(|e| ScanError::from_io(root, &e))?;
        fs::canonicalize(root).map_err(|e| ScanError::from_io(root, &e))
    }

    /// Scans without progress reporting or cancellation.
    pub fn scan(
        &self,
        root: &Path,
        rules: &IgnoreRuleSet,
        cache: &mut ModificationCache,
    ) -> Result<Vec<FileEntry>, CoreError> {
        let never_cancelled = AtomicBool::new(false);
        self.scan_with_progress(root, rules, cache, &never_cancelled, |_| {})
    }

    /// Depth-first scan in byte-wise file name order.
    ///
    /// Excluded directories are pruned, symbolic links are never followed and
    /// the cancellation flag is checked before every filesystem entry. Cache
    /// updates are committed only when the walk completes.
    pub fn scan_with_progress<F>(
        &self,
        root: &Path,
        rules: &IgnoreRuleSet,
        cache: &mut ModificationCache,
        cancel_flag: &AtomicBool,
        progress_callback: F,
    ) -> Result<Vec<FileEntry>, CoreError>
    where
        F: Fn(ScanProgress),
    {
        self.scan_report(root, rules, cache, cancel_flag, progress_callback)
            .map(|report| report.entries)
    }

    /// Like [`scan_with_progress`](Self::scan_with_progress), but also lists
    /// what the rules left out.
    pub fn scan_report<F>(
        &self,
        root: &Path,
        rules: &IgnoreRuleSet,
        cache: &mut ModificationCache,
        cancel_flag: &AtomicBool,
        progress_callback: F,
    ) -> Result<ScanReport, CoreError>
    where
        F: Fn(ScanProgress),
    {
        Self::validate_root(root)?;
        tracing::info!("Starting scan of {}", root.display());

        let mut files = Vec::new();
        let mut ignored = Vec::new();
        let mut updates: Vec<(PathBuf, CacheRecord)> = Vec::new();
        let mut seen = HashSet::new();
        let mut processed = 0usize;
        let mut reused = 0usize;

        let mut rule_walk = rules.walk();
        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(item) = walker.next() {
            if cancel_flag.load(Ordering::Relaxed) {
                tracing::info!("🛑 Scan cancelled after {} files", processed);
                return Err(CoreError::Cancelled);
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if rule_walk.matches(&relative, true) {
                    tracing::debug!("Pruning excluded directory {}/", relative.display());
                    walker.skip_current_dir();
                    ignored.push(IgnoredPath {
                        relative_path: relative,
                        is_directory: true,
                    });
                } else {
                    rule_walk.enter_dir(entry.path())?;
                }
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!("Skipping non-regular entry {}", entry.path().display());
                continue;
            }
            if rule_walk.matches(&relative, false) {
                tracing::debug!("Ignoring {}", relative.display());
                ignored.push(IgnoredPath {
                    relative_path: relative,
                    is_directory: false,
                });
                continue;
            }

            let path = entry.path().to_path_buf();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Could not stat {}: {}", path.display(), e);
                    continue;
                }
            };
            let fingerprint = Fingerprint::from_metadata(&metadata);

            let classification = match extension_hint(&path) {
                Some(hint) => hint,
                None => match fingerprint.and_then(|fp| cache.classification_if_unchanged(&path, &fp)) {
                    Some(cached) => {
                        reused += 1;
                        cached
                    }
                    None => self.sniff(&path),
                },
            };

            if let Some(fingerprint) = fingerprint {
                if classification != Classification::Unreadable {
                    updates.push((
                        path.clone(),
                        CacheRecord {
                            fingerprint,
                            classification,
                        },
                    ));
                }
            }

            seen.insert(path.clone());
            processed += 1;
            if processed % self.options.progress_interval == 0 {
                progress_callback(ScanProgress {
                    processed,
                    total: None,
                    current_path: relative.clone(),
                });
            }

            files.push(FileEntry {
                path,
                relative_path: relative,
                size: metadata.len(),
                classification,
                selected: false,
            });
        }

        for (path, record) in updates {
            cache.update(path, record);
        }
        let dropped = cache.retain_existing(root, &seen);

        tracing::info!(
            "✅ Scan of {} completed: {} files, {} ignored, {} cached classifications reused, {} stale cache entries dropped",
            root.display(),
            files.len(),
            ignored.len(),
            reused,
            dropped
        );
        if rule_walk.nested_files() > 0 || !rule_walk.issues().is_empty() {
            tracing::debug!(
                "Picked up {} nested ignore file(s) during the walk, {} skipped",
                rule_walk.nested_files(),
                rule_walk.issues().len()
            );
        }
        progress_callback(ScanProgress {
            processed,
            total: Some(processed),
            current_path: PathBuf::new(),
        });

        Ok(ScanReport {
            entries: files,
            ignored,
        })
    }

    /// Builds an entry for a single path without walking, e.g. for a selection
    /// that was not part of the last scan. Missing files keep their extension
    /// hint so the read failure surfaces at generation time.
    pub fn describe(&self, root: &Path, relative: &Path) -> FileEntry {
        let path = root.join(relative);
        let (size, classification) = match fs::metadata(&path) {
            Ok(metadata) => (
                metadata.len(),
                extension_hint(&path).unwrap_or_else(|| self.sniff(&path)),
            ),
            Err(_) => (0, extension_hint(&path).unwrap_or(Classification::Text)),
        };
        FileEntry {
            path,
            relative_path: relative.to_path_buf(),
            size,
            classification,
            selected: true,
        }
    }

    fn sniff(&self, path: &Path) -> Classification {
        sniff_file(path, self.options.sniff_bytes).unwrap_or_else(|e| {
            tracing::warn!("Could not inspect {}: {}", path.display(), e);
            Classification::Unreadable
        })
    }
}
