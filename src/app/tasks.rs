//! Task bodies executed on the worker pool, and their terminal bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::events::{StatusEvent, TaskId, TaskResult, TaskStatus};
use super::state::{lock, CoordinatorState};
use super::status_bus::StatusBus;
use crate::config::{settings, CoreConfig};
use crate::core::{
    CoreError, FileEntry, GenerateOptions, GenerationEngine, IgnoreRuleSet, ModificationCache,
    RuleSources, ScanEngine, ScanOptions, ScanProgress, TaskKind,
};

/// What a submitted task should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskRequest {
    Scan {
        root: PathBuf,
    },
    Generate {
        root: PathBuf,
        /// Paths relative to `root`. Absolute paths below `root` are accepted too.
        selection: Vec<PathBuf>,
    },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Scan { .. } => TaskKind::Scan,
            TaskRequest::Generate { .. } => TaskKind::Generate,
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            TaskRequest::Scan { root } | TaskRequest::Generate { root, .. } => root,
        }
    }
}

/// Everything a worker needs to run one task and report on it.
pub(crate) struct TaskContext {
    pub id: TaskId,
    pub kind: TaskKind,
    pub root: PathBuf,
    pub config: Arc<CoreConfig>,
    pub bus: StatusBus,
    pub state: Arc<Mutex<CoordinatorState>>,
    pub cancel_flag: Arc<AtomicBool>,
    /// Serializes writes of the cache file between roots.
    pub persist_lock: Arc<Mutex<()>>,
}

impl TaskContext {
    /// Runs the request synchronously. Called from a blocking worker thread.
    pub fn execute(&self, request: TaskRequest) -> Result<TaskResult, CoreError> {
        match request {
            TaskRequest::Scan { .. } => self.run_scan(),
            TaskRequest::Generate { selection, .. } => self.run_generate(&selection),
        }
    }

    fn report_progress(&self, progress: ScanProgress) {
        self.bus.publish(StatusEvent::Progress {
            task_id: self.id,
            processed: progress.processed,
            total: progress.total,
        });
    }

    fn run_scan(&self) -> Result<TaskResult, CoreError> {
        let root = ScanEngine::validate_root(&self.root)?;
        let rules = IgnoreRuleSet::build_deferred(&root, &RuleSources::from(self.config.as_ref()));
        let cache = lock(&self.state).cache_for(&root);

        let (report, snapshot) = {
            let mut cache = lock(&cache);
            let report = ScanEngine::new(ScanOptions::from(self.config.as_ref())).scan_report(
                &root,
                &rules,
                &mut cache,
                &self.cancel_flag,
                |progress| self.report_progress(progress),
            )?;
            (report, self.config.persist_cache.then(|| cache.clone()))
        };

        if let Some(snapshot) = snapshot {
            self.persist_cache(&root, &snapshot);
        }
        Ok(TaskResult::Scan(report))
    }

    fn run_generate(&self, selection: &[PathBuf]) -> Result<TaskResult, CoreError> {
        let root = ScanEngine::validate_root(&self.root)?;
        let scanned = lock(&self.state).last_scan(&root);
        let known: HashMap<&Path, &FileEntry> = scanned
            .iter()
            .flat_map(|entries| entries.iter())
            .map(|entry| (entry.relative_path.as_path(), entry))
            .collect();

        let scanner = ScanEngine::new(ScanOptions::from(self.config.as_ref()));
        let selected: Vec<FileEntry> = selection
            .iter()
            .map(|path| {
                let relative = path.strip_prefix(&root).unwrap_or(path);
                match known.get(relative) {
                    Some(entry) => FileEntry {
                        selected: true,
                        ..(*entry).clone()
                    },
                    None => scanner.describe(&root, relative),
                }
            })
            .collect();

        let result = GenerationEngine::new(GenerateOptions::from(self.config.as_ref()))
            .generate_with_progress(&root, &selected, &self.cancel_flag, |progress| {
                self.report_progress(progress)
            })?;
        Ok(TaskResult::Generate(result))
    }

    /// Commits this root's cache and writes the saved caches of all roots.
    fn persist_cache(&self, root: &Path, snapshot: &ModificationCache) {
        let Some(path) = cache_file_path(&self.config) else {
            tracing::warn!("Could not determine cache file location, cache not saved.");
            return;
        };
        let _writing = lock(&self.persist_lock);
        let combined = {
            let mut state = lock(&self.state);
            state.commit_cache(root, snapshot);
            state.saved_cache().clone()
        };
        if let Err(e) = combined.save_to(&path) {
            tracing::warn!("Failed to save cache to {:?}: {:#}", path, e);
        }
    }

    /// Records the terminal state and publishes exactly one terminal event.
    ///
    /// A raised cancellation flag wins over a result that arrived anyway.
    pub fn finish(&self, outcome: Result<TaskResult, CoreError>) {
        let cancelled = self.cancel_flag.load(Ordering::Relaxed);
        let (status, event) = match outcome {
            Err(e) if e.is_cancelled() => (TaskStatus::Cancelled, self.cancelled_event()),
            Ok(_) if cancelled => (TaskStatus::Cancelled, self.cancelled_event()),
            Ok(result) => (
                TaskStatus::Completed,
                StatusEvent::Completed {
                    task_id: self.id,
                    result: Arc::new(result),
                },
            ),
            Err(e) => (
                TaskStatus::Failed,
                StatusEvent::Failed {
                    task_id: self.id,
                    error: Arc::new(e),
                },
            ),
        };

        {
            let mut state = lock(&self.state);
            if !state.finish(self.id, status) {
                tracing::debug!("Task {} already finished, dropping {:?}", self.id, status);
                return;
            }
            if let StatusEvent::Completed { result, .. } = &event {
                if let Some(entries) = result.as_scan() {
                    state.set_last_scan(&self.root, Arc::new(entries.to_vec()));
                }
            }
        }

        match &event {
            StatusEvent::Completed { .. } => {
                tracing::info!("✅ {} task {} completed", self.kind, self.id)
            }
            StatusEvent::Failed { error, .. } => {
                tracing::error!("❌ {} task {} failed: {}", self.kind, self.id, error)
            }
            _ => tracing::info!("🛑 {} task {} cancelled", self.kind, self.id),
        }
        self.bus.publish(event);
    }

    fn cancelled_event(&self) -> StatusEvent {
        StatusEvent::Cancelled { task_id: self.id }
    }
}

pub(crate) fn cache_file_path(config: &CoreConfig) -> Option<PathBuf> {
    config
        .cache_file
        .clone()
        .or_else(settings::get_cache_file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;

    fn context(root: &Path, config: CoreConfig) -> (TaskContext, tokio::sync::broadcast::Receiver<StatusEvent>) {
        let bus = StatusBus::new(64);
        let rx = bus.subscribe();
        let state = Arc::new(Mutex::new(CoordinatorState::new(ModificationCache::new())));
        let (id, cancel_flag) = lock(&state).register(TaskKind::Scan, root).unwrap();
        lock(&state).start(id);
        let ctx = TaskContext {
            id,
            kind: TaskKind::Scan,
            root: root.to_path_buf(),
            config: Arc::new(config),
            bus,
            state,
            cancel_flag,
            persist_lock: Arc::new(Mutex::new(())),
        };
        (ctx, rx)
    }

    #[test]
    fn test_completed_scan_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (ctx, mut rx) = context(&root, CoreConfig::default());

        let outcome = ctx.execute(TaskRequest::Scan { root: root.clone() });
        ctx.finish(outcome);
        ctx.finish(Err(CoreError::Cancelled));

        let last = lock(&ctx.state).last_scan(&root).unwrap();
        assert_eq!(last.len(), 1);

        let mut terminal = 0;
        while let Ok(event) = rx.try_recv() {
            if event.is_terminal() {
                assert!(matches!(event, StatusEvent::Completed { .. }));
                terminal += 1;
            }
        }
        assert_eq!(terminal, 1);
    }

    #[test]
    fn test_raised_flag_turns_result_into_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (ctx, mut rx) = context(&root, CoreConfig::default());

        ctx.cancel_flag.store(true, Ordering::Relaxed);
        ctx.finish(Ok(TaskResult::Scan(Default::default())));

        assert!(matches!(rx.try_recv().unwrap(), StatusEvent::Cancelled { .. }));
        assert!(lock(&ctx.state).last_scan(&root).is_none());
        assert_eq!(lock(&ctx.state).status(ctx.id), Some(TaskStatus::Cancelled));
    }

    #[test]
    fn test_generate_resolves_unscanned_and_absolute_selection() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (ctx, _rx) = context(&root, CoreConfig::default());

        let result = ctx
            .execute(TaskRequest::Generate {
                root: root.clone(),
                selection: vec![root.join("a.rs")],
            })
            .unwrap();
        let generation = result.as_generation().unwrap();
        assert_eq!(
            generation.included().collect::<Vec<_>>(),
            vec![Path::new("a.rs")]
        );
    }

    #[test]
    fn test_persisted_cache_is_written_after_scan() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("notes.qqzz"), "plain words").unwrap();
        let root = fs::canonicalize(&project).unwrap();
        let cache_file = dir.path().join("cache/cache.json");
        let config = CoreConfig {
            persist_cache: true,
            cache_file: Some(cache_file.clone()),
            ..CoreConfig::default()
        };
        let (ctx, _rx) = context(&root, config);

        ctx.execute(TaskRequest::Scan { root: root.clone() }).unwrap();

        let saved = ModificationCache::load_from(&cache_file);
        assert!(saved.lookup(&root.join("notes.qqzz")).is_some());
    }

    #[test]
    fn test_persisting_never_waits_on_another_roots_cache() {
        let dir = tempfile::tempdir().unwrap();
        let busy = dir.path().join("busy");
        let small = dir.path().join("small");
        fs::create_dir(&busy).unwrap();
        fs::create_dir(&small).unwrap();
        fs::write(small.join("notes.qqzz"), "plain words").unwrap();
        let busy = fs::canonicalize(&busy).unwrap();
        let small = fs::canonicalize(&small).unwrap();
        let cache_file = dir.path().join("cache.json");
        let config = CoreConfig {
            persist_cache: true,
            cache_file: Some(cache_file.clone()),
            ..CoreConfig::default()
        };
        let (ctx, _rx) = context(&small, config);

        // Hold the other root's cache the way a long-running scan of it would.
        let busy_cache = lock(&ctx.state).cache_for(&busy);
        let held = lock(&busy_cache);

        let ctx = Arc::new(ctx);
        let worker = ctx.clone();
        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let outcome = worker.execute(TaskRequest::Scan { root: worker.root.clone() });
            done_tx.send(outcome.is_ok()).unwrap();
        });

        let finished = done_rx.recv_timeout(Duration::from_secs(10));
        drop(held);
        assert_eq!(finished, Ok(true));
        let saved = ModificationCache::load_from(&cache_file);
        assert!(saved.lookup(&small.join("notes.qqzz")).is_some());
    }

    #[test]
    fn test_cancel_before_execution_reports_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            let sub = dir.path().join(format!("d{i:02}"));
            fs::create_dir(&sub).unwrap();
            fs::write(sub.join(".gitignore"), "*.tmp\n").unwrap();
            fs::write(sub.join("a.txt"), "a").unwrap();
        }
        let root = fs::canonicalize(dir.path()).unwrap();
        let (ctx, mut rx) = context(&root, CoreConfig {
            progress_interval: 1,
            ..CoreConfig::default()
        });

        ctx.cancel_flag.store(true, Ordering::Relaxed);
        let outcome = ctx.execute(TaskRequest::Scan { root: root.clone() });

        assert!(matches!(outcome, Err(CoreError::Cancelled)));
        assert!(rx.try_recv().is_err());
    }
}
