//! Assembles selected files into a single text bundle with a per-file manifest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{CoreError, GenerationError};
use super::overview::ProjectOverview;
use super::tokens::{estimate_tokens, format_count};
use super::{Classification, FileEntry, ScanProgress, TreeGenerator};
use crate::config::CoreConfig;
use crate::utils::file_detection::language_hint;

/// How an included file's bytes were decoded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Utf8 => "utf-8",
            Self::Utf8Bom => "utf-8-bom",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
        };
        f.write_str(name)
    }
}

/// What happened to one selected entry.
#[derive(Debug)]
pub enum FileOutcome {
    Included {
        encoding: TextEncoding,
        tokens: Option<usize>,
    },
    /// The entry was classified binary or unreadable before any read.
    Skipped(Classification),
    Failed(GenerationError),
}

impl FileOutcome {
    pub fn is_included(&self) -> bool {
        matches!(self, FileOutcome::Included { .. })
    }

    /// Human-readable reason for anything that did not make it into the bundle.
    pub fn reason(&self) -> Option<String> {
        match self {
            FileOutcome::Included { .. } => None,
            FileOutcome::Skipped(Classification::Binary) => Some("binary file".to_string()),
            FileOutcome::Skipped(_) => Some("unreadable file".to_string()),
            FileOutcome::Failed(err) => Some(err.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct ManifestEntry {
    pub relative_path: PathBuf,
    pub outcome: FileOutcome,
}

/// The finished bundle. Immutable once returned.
#[derive(Debug)]
pub struct GenerationResult {
    pub bundle: String,
    /// One entry per distinct selected path, in scan order.
    pub manifest: Vec<ManifestEntry>,
    pub token_estimate: Option<usize>,
}

impl GenerationResult {
    pub fn included(&self) -> impl Iterator<Item = &Path> {
        self.manifest
            .iter()
            .filter(|entry| entry.outcome.is_included())
            .map(|entry| entry.relative_path.as_path())
    }

    /// Every entry that was left out, with its reason.
    pub fn skipped(&self) -> impl Iterator<Item = (&Path, String)> {
        self.manifest.iter().filter_map(|entry| {
            entry
                .outcome
                .reason()
                .map(|reason| (entry.relative_path.as_path(), reason))
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &GenerationError)> {
        self.manifest.iter().filter_map(|entry| match &entry.outcome {
            FileOutcome::Failed(err) => Some((entry.relative_path.as_path(), err)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub include_tree: bool,
    pub estimate_tokens: bool,
    pub max_file_size: u64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

impl From<&CoreConfig> for GenerateOptions {
    fn from(config: &CoreConfig) -> Self {
        Self {
            include_tree: config.include_tree,
            estimate_tokens: config.estimate_tokens,
            max_file_size: config.max_file_size_bytes(),
        }
    }
}

/// Written after the closing fence of a file whose content lacks a final newline.
pub const NO_FINAL_NEWLINE_MARKER: &str = "\\ No newline at end of file";

struct IncludedFile {
    display_path: String,
    language: &'static str,
    content: String,
    tokens: Option<usize>,
}

pub struct GenerationEngine {
    options: GenerateOptions,
}

impl GenerationEngine {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    /// Generates without progress reporting or cancellation.
    pub fn generate(
        &self,
        root: &Path,
        selected: &[FileEntry],
    ) -> Result<GenerationResult, CoreError> {
        let never_cancelled = AtomicBool::new(false);
        self.generate_with_progress(root, selected, &never_cancelled, |_| {})
    }

    /// Reads every selected entry and formats the bundle.
    ///
    /// Per-file failures land in the manifest. The only error is cancellation,
    /// which is checked before each file.
    pub fn generate_with_progress<F>(
        &self,
        root: &Path,
        selected: &[FileEntry],
        cancel_flag: &AtomicBool,
        progress_callback: F,
    ) -> Result<GenerationResult, CoreError>
    where
        F: Fn(ScanProgress),
    {
        let mut entries: Vec<&FileEntry> = selected.iter().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries.dedup_by(|a, b| a.relative_path == b.relative_path);

        let total = entries.len();
        tracing::info!("Generating bundle for {} selected files in {}", total, root.display());

        let mut manifest = Vec::with_capacity(total);
        let mut included = Vec::new();
        let mut token_total = 0usize;

        for (i, entry) in entries.into_iter().enumerate() {
            if cancel_flag.load(Ordering::Relaxed) {
                tracing::info!("🛑 Generation cancelled after {} of {} files", i, total);
                return Err(CoreError::Cancelled);
            }

            let outcome = match self.read_entry(root, entry) {
                Ok((content, encoding)) => {
                    let tokens = self.options.estimate_tokens.then(|| estimate_tokens(&content));
                    token_total += tokens.unwrap_or(0);
                    included.push(IncludedFile {
                        display_path: display_path(&entry.relative_path),
                        language: language_hint(&entry.relative_path),
                        content,
                        tokens,
                    });
                    FileOutcome::Included { encoding, tokens }
                }
                Err(outcome) => {
                    if let Some(reason) = outcome.reason() {
                        tracing::warn!("Skipping {}: {}", entry.relative_path.display(), reason);
                    }
                    outcome
                }
            };
            manifest.push(ManifestEntry {
                relative_path: entry.relative_path.clone(),
                outcome,
            });

            progress_callback(ScanProgress {
                processed: i + 1,
                total: Some(total),
                current_path: entry.relative_path.clone(),
            });
        }

        let token_estimate = self.options.estimate_tokens.then_some(token_total);
        let bundle = self.render(root, &included, total, token_estimate);
        tracing::info!(
            "✅ Bundle generated: {} of {} files included, {} bytes",
            included.len(),
            total,
            bundle.len()
        );

        Ok(GenerationResult {
            bundle,
            manifest,
            token_estimate,
        })
    }

    /// Reads and decodes one entry, or returns the outcome explaining why not.
    fn read_entry(
        &self,
        root: &Path,
        entry: &FileEntry,
    ) -> Result<(String, TextEncoding), FileOutcome> {
        let relative = &entry.relative_path;
        if !is_contained(relative) {
            return Err(FileOutcome::Failed(GenerationError::OutsideRoot(
                relative.clone(),
            )));
        }
        if entry.classification != Classification::Text {
            return Err(FileOutcome::Skipped(entry.classification));
        }

        let path = root.join(relative);
        let metadata = fs::metadata(&path)
            .map_err(|e| FileOutcome::Failed(GenerationError::ReadFailed(relative.clone(), e)))?;
        if metadata.len() > self.options.max_file_size {
            return Err(FileOutcome::Failed(GenerationError::TooLarge {
                path: relative.clone(),
                size: metadata.len(),
                limit: self.options.max_file_size,
            }));
        }

        let bytes = fs::read(&path)
            .map_err(|e| FileOutcome::Failed(GenerationError::ReadFailed(relative.clone(), e)))?;
        decode_text(&bytes).ok_or_else(|| {
            FileOutcome::Failed(GenerationError::EncodingUnsupported(relative.clone()))
        })
    }

    fn render(
        &self,
        root: &Path,
        included: &[IncludedFile],
        selected: usize,
        token_estimate: Option<usize>,
    ) -> String {
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let paths: Vec<&str> = included.iter().map(|f| f.display_path.as_str()).collect();

        let mut out = String::new();
        out.push_str(&format!("# Project Snapshot: {root_name}\n"));
        out.push_str(&format!("# Files included: {}\n\n", included.len()));

        out.push_str("## Architectural Overview\n");
        out.push_str(&ProjectOverview::from_paths(&paths).render());
        out.push('\n');

        out.push_str("## Structure\n");
        for path in &paths {
            out.push_str(path);
            out.push('\n');
        }
        out.push('\n');

        if self.options.include_tree {
            let annotated: Vec<(&str, Option<String>)> = included
                .iter()
                .map(|f| {
                    let note = f.tokens.map(|t| format!("({} tokens)", format_count(t)));
                    (f.display_path.as_str(), note)
                })
                .collect();
            out.push_str("## Directory Tree\n");
            out.push_str(&TreeGenerator::generate_annotated_tree(&annotated, &root_name));
            out.push('\n');
        }

        out.push_str("## Summary\n");
        out.push_str(&format!("Files selected: {selected}\n"));
        out.push_str(&format!("Files included: {}\n", included.len()));
        out.push_str(&format!("Files skipped: {}\n", selected - included.len()));
        if let Some(tokens) = token_estimate {
            out.push_str(&format!("Estimated tokens: {}\n", format_count(tokens)));
        }
        out.push('\n');

        out.push_str("## File Contents\n");
        for file in included {
            let fence = fence_for(&file.content);
            let unterminated = !file.content.is_empty() && !file.content.ends_with('\n');
            out.push_str(&format!("\n--- File: {} ---\n", file.display_path));
            out.push_str(&format!("{fence}{}\n", file.language));
            out.push_str(&file.content);
            if unterminated {
                out.push('\n');
            }
            out.push_str(&fence);
            out.push('\n');
            if unterminated {
                out.push_str(NO_FINAL_NEWLINE_MARKER);
                out.push('\n');
            }
        }
        out
    }
}

/// Relative paths that stay below the root: no `..`, no root or prefix components.
fn is_contained(relative: &Path) -> bool {
    relative.components().next().is_some()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `/`-separated form used in the bundle on every platform.
fn display_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A backtick fence longer than any backtick run inside `content`.
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in content.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

/// Decodes UTF-8 (optionally BOM-prefixed) and BOM-marked UTF-16.
fn decode_text(bytes: &[u8]) -> Option<(String, TextEncoding)> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return std::str::from_utf8(rest)
            .ok()
            .map(|s| (s.to_owned(), TextEncoding::Utf8Bom));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes).map(|s| (s, TextEncoding::Utf16Le));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes).map(|s| (s, TextEncoding::Utf16Be));
    }
    std::str::from_utf8(bytes)
        .ok()
        .map(|s| (s.to_owned(), TextEncoding::Utf8))
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(root: &Path, relative: &str, classification: Classification) -> FileEntry {
        FileEntry {
            path: root.join(relative),
            relative_path: PathBuf::from(relative),
            size: 0,
            classification,
            selected: true,
        }
    }

    fn fixture(files: &[(&str, &[u8])]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn plain_engine() -> GenerationEngine {
        GenerationEngine::new(GenerateOptions {
            include_tree: false,
            estimate_tokens: false,
            max_file_size: 1024,
        })
    }

    #[test]
    fn test_single_text_file_bundle() {
        let dir = fixture(&[("a.txt", b"hello")]);
        let root = dir.path();
        let result = plain_engine()
            .generate(root, &[entry(root, "a.txt", Classification::Text)])
            .unwrap();

        let body = result.bundle.split_once('\n').unwrap().1;
        let expected = "\
# Files included: 1

## Architectural Overview
Components:
- Documentation: 1 file
Characteristics:
- Library or utility project
- Documented codebase

## Structure
a.txt

## Summary
Files selected: 1
Files included: 1
Files skipped: 0

## File Contents

--- File: a.txt ---
```
hello
```
\\ No newline at end of file
";
        assert_eq!(body, expected);
        assert!(matches!(
            result.manifest[0].outcome,
            FileOutcome::Included {
                encoding: TextEncoding::Utf8,
                tokens: None
            }
        ));
        assert_eq!(result.token_estimate, None);
    }

    #[test]
    fn test_binary_and_unreadable_entries_are_reported() {
        let dir = fixture(&[("a.rs", b"fn a() {}\n"), ("b.png", b"\x89PNG"), ("c.dat", b"x")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "c.dat", Classification::Unreadable),
            entry(root, "b.png", Classification::Binary),
            entry(root, "a.rs", Classification::Text),
        ];
        let result = plain_engine().generate(root, &selected).unwrap();

        assert_eq!(result.included().collect::<Vec<_>>(), vec![Path::new("a.rs")]);
        let skipped: Vec<_> = result.skipped().collect();
        assert_eq!(
            skipped,
            vec![
                (Path::new("b.png"), "binary file".to_string()),
                (Path::new("c.dat"), "unreadable file".to_string()),
            ]
        );
        assert!(result.bundle.contains("```rust\nfn a() {}\n```\n"));
        assert!(!result.bundle.contains("b.png"));
    }

    #[test]
    fn test_missing_file_fails_without_aborting() {
        let dir = fixture(&[("keep.md", b"# kept\n")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "keep.md", Classification::Text),
            entry(root, "gone.txt", Classification::Text),
        ];
        let result = plain_engine().generate(root, &selected).unwrap();

        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Path::new("gone.txt"));
        assert!(matches!(failures[0].1, GenerationError::ReadFailed(..)));
        assert!(result.bundle.contains("--- File: keep.md ---"));
        assert!(!result.bundle.contains("gone.txt"));
    }

    #[test]
    fn test_oversize_and_escaping_paths_are_rejected() {
        let dir = fixture(&[("big.txt", &[b'x'; 2048][..])]);
        let root = dir.path();
        let selected = vec![
            entry(root, "big.txt", Classification::Text),
            entry(root, "../outside.txt", Classification::Text),
        ];
        let result = plain_engine().generate(root, &selected).unwrap();

        let failures: Vec<_> = result.failures().map(|(_, e)| e).collect();
        assert!(matches!(failures[0], GenerationError::OutsideRoot(_)));
        assert!(matches!(
            failures[1],
            GenerationError::TooLarge { size: 2048, limit: 1024, .. }
        ));
        assert_eq!(result.included().count(), 0);
    }

    #[test]
    fn test_encodings_are_decoded_and_recorded() {
        let mut le = vec![0xFF, 0xFE];
        le.extend("hi".encode_utf16().flat_map(u16::to_le_bytes));
        let mut be = vec![0xFE, 0xFF];
        be.extend("yo".encode_utf16().flat_map(u16::to_be_bytes));
        let dir = fixture(&[
            ("bom.txt", b"\xEF\xBB\xBFbom"),
            ("latin1.txt", b"caf\xE9"),
            ("le.txt", le.as_slice()),
            ("be.txt", be.as_slice()),
        ]);
        let root = dir.path();
        let selected: Vec<_> = ["bom.txt", "latin1.txt", "le.txt", "be.txt"]
            .iter()
            .map(|p| entry(root, p, Classification::Text))
            .collect();
        let result = plain_engine().generate(root, &selected).unwrap();

        let encodings: Vec<_> = result
            .manifest
            .iter()
            .map(|m| match &m.outcome {
                FileOutcome::Included { encoding, .. } => Some(*encoding),
                _ => None,
            })
            .collect();
        assert_eq!(
            encodings,
            vec![
                Some(TextEncoding::Utf16Be),
                Some(TextEncoding::Utf8Bom),
                None,
                Some(TextEncoding::Utf16Le),
            ]
        );
        assert!(matches!(
            result.manifest[2].outcome,
            FileOutcome::Failed(GenerationError::EncodingUnsupported(_))
        ));
        assert!(result.bundle.contains("```\nhi\n```"));
        assert!(result.bundle.contains("```\nbom\n```"));
    }

    #[test]
    fn test_missing_final_newline_is_marked() {
        let dir = fixture(&[("bare.txt", b"hello"), ("ended.txt", b"hello\n"), ("empty.txt", b"")]);
        let root = dir.path();
        let selected: Vec<_> = ["bare.txt", "ended.txt", "empty.txt"]
            .iter()
            .map(|p| entry(root, p, Classification::Text))
            .collect();
        let bundle = plain_engine().generate(root, &selected).unwrap().bundle;

        assert!(bundle.contains(&format!(
            "--- File: bare.txt ---\n```\nhello\n```\n{NO_FINAL_NEWLINE_MARKER}\n"
        )));
        assert!(bundle.contains("--- File: empty.txt ---\n```\n```\n\n--- File: ended.txt"));
        assert!(bundle.ends_with("--- File: ended.txt ---\n```\nhello\n```\n"));
        assert_eq!(bundle.matches(NO_FINAL_NEWLINE_MARKER).count(), 1);
    }

    #[test]
    fn test_summary_counts_skipped_selection() {
        let dir = fixture(&[("a.rs", b"fn a() {}\n"), ("b.png", b"\x89PNG")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "a.rs", Classification::Text),
            entry(root, "b.png", Classification::Binary),
            entry(root, "gone.txt", Classification::Text),
        ];
        let bundle = plain_engine().generate(root, &selected).unwrap().bundle;
        assert!(bundle.contains(
            "## Summary\nFiles selected: 3\nFiles included: 1\nFiles skipped: 2\n\n## File Contents\n"
        ));
        assert!(!bundle.contains("Estimated tokens"));
    }

    #[test]
    fn test_fence_outgrows_backticks_in_content() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("```rust\n```"), "````");
        assert_eq!(fence_for("a ````` b"), "``````");
    }

    #[test]
    fn test_order_and_duplicates_follow_scan_order() {
        let dir = fixture(&[("a.txt", b"1"), ("a/b.txt", b"2"), ("B.txt", b"3")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "a.txt", Classification::Text),
            entry(root, "B.txt", Classification::Text),
            entry(root, "a/b.txt", Classification::Text),
            entry(root, "a.txt", Classification::Text),
        ];
        let result = plain_engine().generate(root, &selected).unwrap();

        let order: Vec<_> = result.included().collect();
        assert_eq!(
            order,
            vec![Path::new("B.txt"), Path::new("a/b.txt"), Path::new("a.txt")]
        );
        assert_eq!(result.manifest.len(), 3);
    }

    #[test]
    fn test_tree_and_tokens_when_enabled() {
        let dir = fixture(&[("src/lib.rs", b"pub fn x() {}\n")]);
        let root = dir.path();
        let engine = GenerationEngine::new(GenerateOptions {
            include_tree: true,
            estimate_tokens: true,
            max_file_size: 1024,
        });
        let result = engine
            .generate(root, &[entry(root, "src/lib.rs", Classification::Text)])
            .unwrap();

        assert!(result.bundle.contains("## Directory Tree\n"));
        let tokens = result.token_estimate.unwrap();
        assert!(tokens > 0 && tokens < 1000);
        assert!(result
            .bundle
            .contains(&format!("└── 📁 src\n    └── 📄 lib.rs ({tokens} tokens)\n")));
        assert!(result.bundle.contains(&format!("Estimated tokens: {tokens}\n")));
        assert!(result.bundle.contains("Primary technologies: Rust\n"));
        assert!(matches!(
            result.manifest[0].outcome,
            FileOutcome::Included { tokens: Some(t), .. } if t == tokens
        ));
    }

    #[test]
    fn test_generation_is_idempotent() {
        let dir = fixture(&[("a.txt", b"hello"), ("z/y.py", b"print(1)\n")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "a.txt", Classification::Text),
            entry(root, "z/y.py", Classification::Text),
        ];
        let engine = GenerationEngine::new(GenerateOptions::default());
        assert_eq!(
            engine.generate(root, &selected).unwrap().bundle,
            engine.generate(root, &selected).unwrap().bundle
        );
    }

    #[test]
    fn test_cancelled_generation_returns_no_result() {
        let dir = fixture(&[("a.txt", b"a"), ("b.txt", b"b")]);
        let root = dir.path();
        let selected = vec![
            entry(root, "a.txt", Classification::Text),
            entry(root, "b.txt", Classification::Text),
        ];
        let cancel = AtomicBool::new(false);
        let result = plain_engine().generate_with_progress(root, &selected, &cancel, |_| {
            cancel.store(true, Ordering::Relaxed)
        });
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
