/*!
 * ID Types
 * Type-safe wrappers for group, worker and segment identifiers
 */

use super::limits::SEGMENT_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Submission group ID, assigned monotonically starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

/// Worker ID. The caller of `give` is reported as worker 0, pool threads start at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Thread blocked in `give` stealing work
    pub const CALLER: WorkerId = WorkerId(0);
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GroupId {
    fn from(id: u64) -> Self {
        GroupId(id)
    }
}

// ============================================================================
// Segment Names
// ============================================================================

/// Generate a unique shared segment name (`psm_` followed by a simple uuid)
pub fn segment_name() -> String {
    format!("{}{}", SEGMENT_PREFIX, Uuid::new_v4().simple())
}
