/*!
 * Shared Memory Types
 * Segment kinds, transferable handles and errors for shared segments
 */

use crate::core::bincode;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for shared segment operations
pub type SharedMemoryResult<T> = Result<T, SharedMemoryError>;

/// Shared memory error types
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum SharedMemoryError {
    /// Segment not found
    #[error("Segment not found: {0}")]
    #[diagnostic(
        code(shm::not_found),
        help("The segment was unlinked or the handle belongs to another registry.")
    )]
    NotFound(String),

    /// Handle kind does not match the segment
    #[error("Segment {name} holds a {found}, not a {expected}")]
    #[diagnostic(code(shm::kind_mismatch))]
    KindMismatch {
        name: String,
        expected: SegmentKind,
        found: SegmentKind,
    },

    /// Table capacity rejected at creation
    #[error("Invalid capacity {0}: must be a nonzero power of two within limits")]
    #[diagnostic(code(shm::invalid_capacity))]
    InvalidCapacity(usize),

    /// Index tracker has no free slot
    #[error("Queue index tracker full: {needed} entries needed, {available} of {capacity} free")]
    #[diagnostic(
        code(shm::tracker_full),
        help("Raise the table capacity to match the number of in-flight groups.")
    )]
    TrackerFull {
        needed: usize,
        available: usize,
        capacity: usize,
    },

    /// Index tracker drained
    #[error("Queue index tracker is empty")]
    #[diagnostic(
        code(shm::tracker_empty),
        help("A task claim must be taken from the stack counter before asking for a queue.")
    )]
    TrackerEmpty,

    /// Group router has no free slot
    #[error("Group router full: capacity {0}")]
    #[diagnostic(
        code(shm::router_full),
        help("Raise the table capacity to match the number of groups awaiting results.")
    )]
    RouterFull(usize),

    /// No route registered for a group
    #[error("No route registered for group {0}")]
    #[diagnostic(code(shm::route_missing))]
    RouteMissing(u64),

    /// Handle could not be encoded or decoded
    #[error("Handle encoding failed: {0}")]
    #[diagnostic(code(shm::encoding))]
    Encoding(String),
}

/// What a shared segment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Counter,
    Tracker,
    Router,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Counter => "counter",
            SegmentKind::Tracker => "tracker",
            SegmentKind::Router => "router",
        };
        f.write_str(name)
    }
}

/// Name-based reference to a shared segment
///
/// Cheap to serialize; the receiving side re-attaches through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedHandle {
    pub name: String,
    pub kind: SegmentKind,
}

impl SharedHandle {
    pub fn new(name: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Encode the handle for transfer
    pub fn to_bytes(&self) -> SharedMemoryResult<Vec<u8>> {
        bincode::to_vec(self).map_err(|e| SharedMemoryError::Encoding(e.to_string()))
    }

    /// Decode a handle produced by `to_bytes`
    pub fn from_bytes(bytes: &[u8]) -> SharedMemoryResult<Self> {
        bincode::from_slice(bytes).map_err(|e| SharedMemoryError::Encoding(e.to_string()))
    }
}

impl fmt::Display for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_bytes_round_trip() {
        let handle = SharedHandle::new("psm_abc", SegmentKind::Router);
        let bytes = handle.to_bytes().unwrap();
        assert_eq!(SharedHandle::from_bytes(&bytes).unwrap(), handle);
        assert_eq!(handle.to_string(), "router:psm_abc");
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = SharedHandle::from_bytes(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, SharedMemoryError::Encoding(_)));
    }

    #[test]
    fn test_error_serialization() {
        let err = SharedMemoryError::TrackerFull {
            needed: 3,
            available: 1,
            capacity: 8,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("tracker_full"));
        let back: SharedMemoryError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
