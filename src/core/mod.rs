pub mod cache;
pub mod error;
pub mod generator;
pub mod ignore;
pub mod overview;
pub mod scanner;
pub mod tokens;
pub mod tree_generator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Content classification of a discovered file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Text,
    Binary,
    Unreadable,
}

/// One candidate file produced by a scan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the project root.
    pub relative_path: PathBuf,
    pub size: u64,
    pub classification: Classification,
    /// Selection state, owned by the caller. Scans always produce `false`.
    pub selected: bool,
}

/// A path a scan left out because a rule excluded it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IgnoredPath {
    pub relative_path: PathBuf,
    /// Pruned directories are listed once; nothing below them is visited.
    pub is_directory: bool,
}

/// Everything a completed scan produced, in walk order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub entries: Vec<FileEntry>,
    pub ignored: Vec<IgnoredPath>,
}

/// Progress reported by long-running scan and generate loops.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: Option<usize>,
    pub current_path: PathBuf,
}

/// The two kinds of work the coordinator schedules.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Scan,
    Generate,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Scan => f.write_str("scan"),
            TaskKind::Generate => f.write_str("generate"),
        }
    }
}

pub use cache::{CacheRecord, Fingerprint, ModificationCache};
pub use error::{ConfigError, CoreError, GenerationError, ScanError, ScanErrorReason, TaskError};
pub use generator::{
    FileOutcome, GenerateOptions, GenerationEngine, GenerationResult, ManifestEntry, TextEncoding,
};
pub use self::ignore::{IgnoreRuleSet, RuleLayer, RuleOrigin, RuleSources, RuleWalk};
pub use scanner::{ScanEngine, ScanOptions};
pub use overview::ProjectOverview;
pub use tree_generator::TreeGenerator;
