pub mod settings;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunables for the scan/generate pipeline and its task coordinator.
///
/// Every field has a default, so partial or older config files load cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Size of the worker pool that runs scan and generate tasks.
    pub max_workers: usize,
    /// Emit a progress event every this many files.
    pub progress_interval: usize,
    /// How many leading bytes are inspected for files with ambiguous extensions.
    pub sniff_bytes: usize,
    pub max_file_size_mb: u64,
    pub vcs_ignore_file: String,
    pub tool_ignore_file: String,
    /// Patterns appended to the built-in default layer.
    pub extra_ignore_patterns: Vec<String>,
    pub include_tree: bool,
    pub estimate_tokens: bool,
    /// Buffer size of the status event channel.
    pub event_capacity: usize,
    pub persist_cache: bool,
    /// Overrides the platform cache location when set.
    pub cache_file: Option<PathBuf>,
}

impl CoreConfig {
    pub fn load() -> Result<Self> {
        settings::load_config(None)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_workers: workers,
            progress_interval: 25,
            sniff_bytes: 1024,
            max_file_size_mb: 20,
            vcs_ignore_file: ".gitignore".to_string(),
            tool_ignore_file: ".llmignore".to_string(),
            extra_ignore_patterns: Vec::new(),
            include_tree: true,
            estimate_tokens: true,
            event_capacity: 1024,
            persist_cache: false,
            cache_file: None,
        }
    }
}
