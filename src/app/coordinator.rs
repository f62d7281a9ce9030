//! Runs scan and generate tasks off the caller's path on a bounded worker pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};

use super::events::{StatusEvent, TaskHandle, TaskId, TaskStatus};
use super::state::{lock, CoordinatorState};
use super::status_bus::StatusBus;
use super::tasks::{cache_file_path, TaskContext, TaskRequest};
use crate::config::CoreConfig;
use crate::core::{CoreError, FileEntry, ModificationCache, TaskError};

/// Schedules tasks, enforces one active task per root and kind, and relays
/// their lifecycle on a [`StatusBus`].
///
/// Every submitted task ends with exactly one of `Completed`, `Failed` or
/// `Cancelled`. A task cancelled before a worker picks it up never emits
/// `Started`.
pub struct TaskCoordinator {
    config: Arc<CoreConfig>,
    runtime: Handle,
    bus: StatusBus,
    state: Arc<Mutex<CoordinatorState>>,
    workers: Arc<Semaphore>,
    persist_lock: Arc<Mutex<()>>,
}

impl TaskCoordinator {
    /// Creates a coordinator on the current Tokio runtime.
    pub fn new(config: CoreConfig) -> anyhow::Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: CoreConfig, runtime: Handle) -> Self {
        let seed_cache = if config.persist_cache {
            cache_file_path(&config)
                .map(|path| ModificationCache::load_from(&path))
                .unwrap_or_default()
        } else {
            ModificationCache::new()
        };
        let worker_count = config.max_workers.max(1);
        tracing::info!(
            "Task coordinator ready: {} workers, {} cached fingerprints",
            worker_count,
            seed_cache.len()
        );

        Self {
            bus: StatusBus::new(config.event_capacity),
            config: Arc::new(config),
            runtime,
            state: Arc::new(Mutex::new(CoordinatorState::new(seed_cache))),
            workers: Arc::new(Semaphore::new(worker_count)),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.bus.subscribe()
    }

    pub fn status_bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn request_scan(&self, root: impl Into<PathBuf>) -> Result<TaskHandle, TaskError> {
        self.submit(TaskRequest::Scan { root: root.into() })
    }

    pub fn request_generate(
        &self,
        root: impl Into<PathBuf>,
        selection: Vec<PathBuf>,
    ) -> Result<TaskHandle, TaskError> {
        self.submit(TaskRequest::Generate {
            root: root.into(),
            selection,
        })
    }

    /// Queues `request` and returns immediately.
    ///
    /// Fails with [`TaskError::Busy`] while a task of the same kind is pending
    /// or running for the same root.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskHandle, TaskError> {
        let kind = request.kind();
        let root = normalize_root(request.root());
        let (id, cancel_flag) = lock(&self.state).register(kind, &root)?;
        tracing::info!("Queued {} task {} for {}", kind, id, root.display());

        let context = TaskContext {
            id,
            kind,
            root: root.clone(),
            config: self.config.clone(),
            bus: self.bus.clone(),
            state: self.state.clone(),
            cancel_flag,
            persist_lock: self.persist_lock.clone(),
        };
        self.runtime
            .spawn(run_task(context, request, self.workers.clone()));

        Ok(TaskHandle { id, kind, root })
    }

    /// Requests cooperative cancellation. Cancelling a finished task is a no-op.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), TaskError> {
        let previous = lock(&self.state).request_cancel(task_id)?;
        match previous {
            TaskStatus::Pending => {
                tracing::info!("🛑 Task {} cancelled before it started", task_id);
                self.bus.publish(StatusEvent::Cancelled { task_id });
            }
            TaskStatus::Running => {
                tracing::info!("Cancellation requested for task {}", task_id);
            }
            status => {
                tracing::debug!("Task {} already {:?}, nothing to cancel", task_id, status);
            }
        }
        Ok(())
    }

    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        lock(&self.state).status(task_id)
    }

    /// Entries of the most recent completed scan of `root`.
    pub fn last_scan(&self, root: &Path) -> Option<Arc<Vec<FileEntry>>> {
        lock(&self.state).last_scan(&normalize_root(root))
    }
}

/// Canonical form of `root` when it exists, so aliases share one busy slot.
fn normalize_root(root: &Path) -> PathBuf {
    fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

async fn run_task(context: TaskContext, request: TaskRequest, workers: Arc<Semaphore>) {
    let _permit = workers.acquire_owned().await.ok();

    let started = lock(&context.state).start(context.id);
    if !started {
        tracing::debug!("Task {} was cancelled while queued", context.id);
        return;
    }
    context.bus.publish(StatusEvent::Started {
        task_id: context.id,
        kind: context.kind,
    });
    tracing::info!("Started {} task {}", context.kind, context.id);

    let context = Arc::new(context);
    let worker = context.clone();
    let outcome = tokio::task::spawn_blocking(move || worker.execute(request))
        .await
        .map_err(CoreError::from)
        .and_then(|result| result);
    context.finish(outcome);
}
