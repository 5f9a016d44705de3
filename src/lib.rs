/*!
 * Process Coordinator Library
 * Fixed worker pool running groups of tasks with ordered results and nested submission
 */

pub mod core;
pub mod ipc;
pub mod manager;
pub mod monitoring;
pub mod process;

// Re-exports
pub use crate::core::{CoordinatorConfig, CoordinatorError, GroupId, ManagerError, ManagerLayout, Result};
pub use manager::{valid_indexes, Kwargs, TaskFailure, TaskFunction, TaskIdentifier, TaskOutput};
pub use monitoring::init_tracing;
pub use process::{CoordinatorHandle, ProcessCoordinator, StatsSnapshot, Submission, TaskContext};
