//! Defines the error taxonomy for the `core` module.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::TaskKind;

/// Problems found while compiling ignore files.
///
/// Malformed lines never abort a scan; they are skipped and collected as issues
/// on the `IgnoreRuleSet`. Only an undecodable ignore file makes the strict
/// `IgnoreRuleSet::build` fail.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An ignore file exists but is not valid UTF-8 text.
    #[error("Ignore file {0} cannot be decoded as text")]
    Undecodable(PathBuf),

    /// A single pattern line could not be compiled into a glob.
    #[error("Invalid pattern {pattern:?} at {}:{line}: {source}", file.display())]
    InvalidPattern {
        file: PathBuf,
        line: usize,
        pattern: String,
        #[source]
        source: ignore::Error,
    },

    /// An ignore file exists but could not be read.
    #[error("I/O error for ignore file {1}: {0}")]
    Io(#[source] std::io::Error, PathBuf),
}

/// Why a project root could not be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorReason {
    NotADirectory,
    PermissionDenied,
    RootNotFound,
}

impl fmt::Display for ScanErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotADirectory => "not a directory",
            Self::PermissionDenied => "permission denied",
            Self::RootNotFound => "root not found",
        };
        f.write_str(text)
    }
}

/// A root-level failure that aborts the whole scan.
#[derive(Debug, Error)]
#[error("Cannot scan {}: {reason}", root.display())]
pub struct ScanError {
    pub root: PathBuf,
    pub reason: ScanErrorReason,
}

impl ScanError {
    pub fn new(root: impl Into<PathBuf>, reason: ScanErrorReason) -> Self {
        Self {
            root: root.into(),
            reason,
        }
    }

    /// Maps an I/O error on the root itself to a scan failure reason.
    pub fn from_io(root: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => ScanErrorReason::RootNotFound,
            std::io::ErrorKind::PermissionDenied => ScanErrorReason::PermissionDenied,
            _ => ScanErrorReason::NotADirectory,
        };
        Self::new(root, reason)
    }
}

/// A per-file failure during bundle generation. Collected into the manifest.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to read {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("Unsupported text encoding in {}", .0.display())]
    EncodingUnsupported(PathBuf),

    #[error("File {} is too large ({size} bytes, limit {limit})", path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Path {} escapes the project root", .0.display())]
    OutsideRoot(PathBuf),
}

/// Rejections and non-failure outcomes of task submission and control.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("A {kind} task is already active for {}", root.display())]
    Busy { kind: TaskKind, root: PathBuf },

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Unknown task id {0}")]
    UnknownTask(u64),
}

/// The primary error type for the `core` module.
///
/// This enum encapsulates everything a scan or generate task can end with
/// other than success.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Represents an error that occurred when a Tokio task was joined.
    /// This is often due to a task panicking.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Represents a user-initiated cancellation of an operation.
    #[error("Operation was cancelled by the user")]
    Cancelled,
}

impl CoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}
