//! Task orchestration: the coordinator, its worker bodies and the status bus.

pub mod coordinator;
pub mod events;
pub mod state;
pub mod status_bus;
pub mod tasks;

pub use coordinator::TaskCoordinator;
pub use events::{StatusEvent, TaskHandle, TaskId, TaskResult, TaskStatus};
pub use status_bus::StatusBus;
pub use tasks::TaskRequest;
