/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export SharedMemoryError from the ipc module
pub use crate::ipc::shm::SharedMemoryError;

/// Manager backend and allocator errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ManagerError {
    #[error("Task stack {0} is empty")]
    #[diagnostic(
        code(manager::empty_stack),
        help("Take a task claim through check() before fetching from a stack.")
    )]
    EmptyStack(usize),

    #[error("Invalid submission: {0}")]
    #[diagnostic(
        code(manager::invalid_submission),
        help("Per-task keyword lists need exactly one value per task. Use split mode to chunk longer lists.")
    )]
    InvalidSubmission(String),

    #[error("Group {0} was never submitted")]
    #[diagnostic(code(manager::unknown_group))]
    UnknownGroup(u64),

    #[error("Group {0} is not awaiting collection")]
    #[diagnostic(
        code(manager::already_retrieved),
        help("Results of a group can be retrieved once, and only if it was submitted with results enabled.")
    )]
    AlreadyRetrieved(u64),

    #[error("Results sorter {0} is shut down")]
    #[diagnostic(code(manager::sorter_closed))]
    SorterClosed(usize),

    #[error("Manager backend failed to start: {0}")]
    #[diagnostic(
        code(manager::backend_startup),
        help("Check thread limits of the host.")
    )]
    BackendStartup(String),

    #[error("Shared memory error: {0}")]
    #[diagnostic(transparent)]
    Shared(#[from] SharedMemoryError),
}

/// Coordinator errors surfaced to callers of `submit_tasks` and `give`
#[derive(Error, Debug, Diagnostic)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(coordinator::configuration),
        help("Workers and managers must be at least 1 and the table capacity a power of two.")
    )]
    Configuration(String),

    #[error("Worker pool failed to start: {0}")]
    #[diagnostic(code(coordinator::backend_startup))]
    BackendStartup(String),

    #[error("Nothing can complete group {0}")]
    #[diagnostic(
        code(coordinator::nothing_outstanding),
        help("No task is queued and no result is outstanding for this group.")
    )]
    NothingOutstanding(u64),

    #[error("{0} worker thread(s) panicked")]
    #[diagnostic(code(coordinator::worker_panicked))]
    WorkerPanicked(usize),

    #[error("Coordinator is shut down")]
    #[diagnostic(code(coordinator::shut_down))]
    ShutDown,

    #[error("Manager error: {0}")]
    #[diagnostic(transparent)]
    Manager(#[from] ManagerError),
}

impl From<SharedMemoryError> for CoordinatorError {
    fn from(err: SharedMemoryError) -> Self {
        CoordinatorError::Manager(ManagerError::Shared(err))
    }
}

/// Result type for manager operations
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
