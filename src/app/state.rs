//! Defines the shared, mutable bookkeeping of the task coordinator.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::events::{TaskId, TaskStatus};
use crate::core::{FileEntry, ModificationCache, TaskError, TaskKind};

/// How many finished tasks stay queryable through [`CoordinatorState::status`].
pub const RETAINED_FINISHED_TASKS: usize = 256;

/// Locks `mutex`, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TaskRecord {
    kind: TaskKind,
    root: PathBuf,
    status: TaskStatus,
    cancel_flag: Arc<AtomicBool>,
}

#[derive(Default)]
struct RootState {
    cache: Arc<Mutex<ModificationCache>>,
    last_scan: Option<Arc<Vec<FileEntry>>>,
}

/// Task table plus per-root caches and scan results.
///
/// Wrapped in an `Arc<Mutex<...>>` and shared between the coordinator and its
/// workers. The lock is only held for bookkeeping, never across file I/O.
pub struct CoordinatorState {
    next_id: u64,
    tasks: HashMap<TaskId, TaskRecord>,
    /// Terminal tasks, oldest first. Records beyond the retention limit are dropped.
    finished: VecDeque<TaskId>,
    roots: HashMap<PathBuf, RootState>,
    /// The start-up cache plus the namespace of every completed scan since.
    /// New roots are seeded from it; the cache file is written from it.
    saved_cache: ModificationCache,
}

impl CoordinatorState {
    pub fn new(saved_cache: ModificationCache) -> Self {
        Self {
            next_id: 1,
            tasks: HashMap::new(),
            finished: VecDeque::new(),
            roots: HashMap::new(),
            saved_cache,
        }
    }

    /// Registers a pending task, or rejects it if one of the same kind is
    /// still pending or running for `root`.
    pub fn register(
        &mut self,
        kind: TaskKind,
        root: &Path,
    ) -> Result<(TaskId, Arc<AtomicBool>), TaskError> {
        let busy = self
            .tasks
            .values()
            .any(|task| task.kind == kind && task.root == root && !task.status.is_terminal());
        if busy {
            return Err(TaskError::Busy {
                kind,
                root: root.to_path_buf(),
            });
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.tasks.insert(
            id,
            TaskRecord {
                kind,
                root: root.to_path_buf(),
                status: TaskStatus::Pending,
                cancel_flag: cancel_flag.clone(),
            },
        );
        Ok((id, cancel_flag))
    }

    /// Moves a pending task to running. Returns `false` if it was cancelled first.
    pub fn start(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Moves a task into a terminal state. Returns `false` if it already was in one.
    pub fn finish(&mut self, id: TaskId, status: TaskStatus) -> bool {
        debug_assert!(status.is_terminal());
        match self.tasks.get_mut(&id) {
            Some(task) if !task.status.is_terminal() => {
                task.status = status;
                self.retire(id);
                true
            }
            _ => false,
        }
    }

    fn retire(&mut self, id: TaskId) {
        self.finished.push_back(id);
        while self.finished.len() > RETAINED_FINISHED_TASKS {
            if let Some(oldest) = self.finished.pop_front() {
                self.tasks.remove(&oldest);
            }
        }
    }

    /// Raises the cancellation flag and returns the status the task had before.
    ///
    /// A pending task never runs, so it is marked cancelled right away and the
    /// caller is responsible for announcing it.
    pub fn request_cancel(&mut self, id: TaskId) -> Result<TaskStatus, TaskError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(TaskError::UnknownTask(id.0))?;
        let previous = task.status;
        if !previous.is_terminal() {
            task.cancel_flag.store(true, Ordering::Relaxed);
        }
        if previous == TaskStatus::Pending {
            task.status = TaskStatus::Cancelled;
            self.retire(id);
        }
        Ok(previous)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|task| task.status)
    }

    /// The cache namespace of `root`, created from the saved cache on first use.
    pub fn cache_for(&mut self, root: &Path) -> Arc<Mutex<ModificationCache>> {
        let seed = &self.saved_cache;
        self.roots
            .entry(root.to_path_buf())
            .or_insert_with(|| RootState {
                cache: Arc::new(Mutex::new(seed.for_root(root))),
                last_scan: None,
            })
            .cache
            .clone()
    }

    /// Replaces the saved entries under `root` with a snapshot of its namespace.
    ///
    /// Callers pass a copy taken after their own scan, so no other root's
    /// cache lock is ever needed.
    pub fn commit_cache(&mut self, root: &Path, snapshot: &ModificationCache) {
        self.saved_cache.invalidate_root(root);
        self.saved_cache.merge(snapshot);
    }

    pub fn saved_cache(&self) -> &ModificationCache {
        &self.saved_cache
    }

    pub fn last_scan(&self, root: &Path) -> Option<Arc<Vec<FileEntry>>> {
        self.roots.get(root).and_then(|state| state.last_scan.clone())
    }

    pub fn set_last_scan(&mut self, root: &Path, entries: Arc<Vec<FileEntry>>) {
        self.roots.entry(root.to_path_buf()).or_default().last_scan = Some(entries);
    }
}
