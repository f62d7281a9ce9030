//! Defines the task handles and the events published on the status bus.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{CoreError, FileEntry, GenerationResult, ScanReport, TaskKind};

/// Identifier of a submitted task, unique per coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task. Terminal states are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Returned by a successful submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub kind: TaskKind,
    /// The project root the task is scoped to, canonicalized when possible.
    pub root: PathBuf,
}

/// Payload of a `Completed` event.
#[derive(Debug)]
pub enum TaskResult {
    Scan(ScanReport),
    Generate(GenerationResult),
}

impl TaskResult {
    /// The scanned entries, in walk order.
    pub fn as_scan(&self) -> Option<&[FileEntry]> {
        self.as_scan_report().map(|report| report.entries.as_slice())
    }

    pub fn as_scan_report(&self) -> Option<&ScanReport> {
        match self {
            TaskResult::Scan(report) => Some(report),
            TaskResult::Generate(_) => None,
        }
    }

    pub fn as_generation(&self) -> Option<&GenerationResult> {
        match self {
            TaskResult::Generate(result) => Some(result),
            TaskResult::Scan(_) => None,
        }
    }
}

/// Lifecycle notifications, fanned out to every subscriber.
#[derive(Clone, Debug)]
pub enum StatusEvent {
    Started {
        task_id: TaskId,
        kind: TaskKind,
    },
    Progress {
        task_id: TaskId,
        processed: usize,
        total: Option<usize>,
    },
    Completed {
        task_id: TaskId,
        result: Arc<TaskResult>,
    },
    Failed {
        task_id: TaskId,
        error: Arc<CoreError>,
    },
    Cancelled {
        task_id: TaskId,
    },
}

impl StatusEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            StatusEvent::Started { task_id, .. }
            | StatusEvent::Progress { task_id, .. }
            | StatusEvent::Completed { task_id, .. }
            | StatusEvent::Failed { task_id, .. }
            | StatusEvent::Cancelled { task_id } => *task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusEvent::Completed { .. } | StatusEvent::Failed { .. } | StatusEvent::Cancelled { .. }
        )
    }
}
