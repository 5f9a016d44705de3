/*!
 * Shared Memory Module
 * Named segments shared between workers and manager backends
 */

pub mod manager;
pub mod types;

// Re-export public API
pub use manager::{RegistryStats, Segment, SegmentRegistry};
pub use types::{SegmentKind, SharedHandle, SharedMemoryError, SharedMemoryResult};
