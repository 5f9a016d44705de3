/*!
 * Process Module
 * Worker pool, submissions and coordinator lifecycle
 */

pub mod coordinator;
pub mod stats;
pub mod submission;
mod worker;

// Re-export for convenience
pub use coordinator::{CoordinatorHandle, ProcessCoordinator, TaskContext};
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use submission::Submission;
