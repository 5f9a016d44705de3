/*!
 * Shared Counter
 * Lock-protected integer shared by every worker through a named segment
 */

use super::shm::{Segment, SegmentKind, SegmentRegistry, SharedHandle, SharedMemoryError, SharedMemoryResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Atomically mutable shared integer
///
/// Every read-modify-write happens under a single lock acquisition and
/// returns the value after the update.
#[derive(Clone)]
pub struct SharedCounter {
    handle: SharedHandle,
    value: Arc<Mutex<i64>>,
}

impl SharedCounter {
    /// Create a counter segment holding `initial`
    pub fn create(registry: &SegmentRegistry, initial: i64) -> Self {
        let value = Arc::new(Mutex::new(initial));
        let handle = registry.create(Segment::Counter(Arc::clone(&value)));
        Self { handle, value }
    }

    /// Re-attach to an existing counter segment
    pub fn attach(registry: &SegmentRegistry, handle: &SharedHandle) -> SharedMemoryResult<Self> {
        match registry.attach(handle)? {
            Segment::Counter(value) => Ok(Self {
                handle: handle.clone(),
                value,
            }),
            other => Err(SharedMemoryError::KindMismatch {
                name: handle.name.clone(),
                expected: SegmentKind::Counter,
                found: other.kind(),
            }),
        }
    }

    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// Add `delta` and return the new value
    #[inline]
    pub fn increment(&self, delta: i64) -> i64 {
        let mut value = self.value.lock();
        *value += delta;
        *value
    }

    /// Subtract `delta` and return the new value
    #[inline]
    pub fn decrement(&self, delta: i64) -> i64 {
        let mut value = self.value.lock();
        *value -= delta;
        *value
    }

    /// Decrement, inspect, and compensate within one lock hold
    ///
    /// Returns the new value when it stayed non-negative, otherwise restores
    /// the previous value and returns `None`. The counter never drifts.
    #[inline]
    pub fn try_decrement(&self, delta: i64) -> Option<i64> {
        let mut value = self.value.lock();
        *value -= delta;
        if *value < 0 {
            *value += delta;
            None
        } else {
            Some(*value)
        }
    }

    #[inline]
    pub fn value(&self) -> i64 {
        *self.value.lock()
    }
}

impl fmt::Debug for SharedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCounter")
            .field("handle", &self.handle)
            .field("value", &self.value())
            .finish()
    }
}
