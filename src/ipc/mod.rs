/*!
 * IPC Module
 * Shared coordination primitives: counters, queue index tracker, group router
 */

pub mod counter;
pub mod router;
pub mod shm;
pub mod tracker;

// Re-export for convenience
pub use counter::SharedCounter;
pub use router::{RouteAssignment, SharedGroupRouter};
pub use shm::{SegmentKind, SegmentRegistry, SharedHandle, SharedMemoryError, SharedMemoryResult};
pub use tracker::SharedQueueIndexTracker;
