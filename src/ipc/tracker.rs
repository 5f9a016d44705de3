/*!
 * Shared Queue Index Tracker
 * Stack of per-queue countdowns deciding which task stack a worker drains next
 */

use super::shm::{Segment, SegmentKind, SegmentRegistry, SharedHandle, SharedMemoryError, SharedMemoryResult};
use crate::core::limits::MAX_TABLE_CAPACITY;
use parking_lot::Mutex;
use std::sync::Arc;

/// One registered batch of slots for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Countdown {
    queue: usize,
    remaining: usize,
}

/// Fixed-capacity countdown stack backing the tracker segment
#[derive(Debug)]
pub struct TrackerTable {
    entries: Vec<Countdown>,
    capacity: usize,
}

impl TrackerTable {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn available(&self) -> usize {
        self.capacity - self.entries.len()
    }

    fn next(&mut self) -> SharedMemoryResult<usize> {
        while let Some(top) = self.entries.last_mut() {
            if top.remaining == 0 {
                self.entries.pop();
                continue;
            }
            top.remaining -= 1;
            let queue = top.queue;
            if top.remaining == 0 {
                self.entries.pop();
            }
            return Ok(queue);
        }
        Err(SharedMemoryError::TrackerEmpty)
    }
}

/// Shared queue index tracker
///
/// Last-registered-first-drained: `next` always answers from the most
/// recently added queue that still has slots.
#[derive(Clone)]
pub struct SharedQueueIndexTracker {
    handle: SharedHandle,
    table: Arc<Mutex<TrackerTable>>,
}

impl SharedQueueIndexTracker {
    pub fn create(registry: &SegmentRegistry, capacity: usize) -> SharedMemoryResult<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_TABLE_CAPACITY {
            return Err(SharedMemoryError::InvalidCapacity(capacity));
        }
        let table = Arc::new(Mutex::new(TrackerTable::new(capacity)));
        let handle = registry.create(Segment::Tracker(Arc::clone(&table)));
        Ok(Self { handle, table })
    }

    pub fn attach(registry: &SegmentRegistry, handle: &SharedHandle) -> SharedMemoryResult<Self> {
        match registry.attach(handle)? {
            Segment::Tracker(table) => Ok(Self {
                handle: handle.clone(),
                table,
            }),
            other => Err(SharedMemoryError::KindMismatch {
                name: handle.name.clone(),
                expected: SegmentKind::Tracker,
                found: other.kind(),
            }),
        }
    }

    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// Register `slots` more items coming for `queue`
    pub fn add(&self, queue: usize, slots: usize) -> SharedMemoryResult<()> {
        self.add_many(&[(queue, slots)])
    }

    /// Register several `(queue, slots)` batches atomically
    ///
    /// The last pair ends up on top. Either every nonempty batch is
    /// registered or none is.
    pub fn add_many(&self, batches: &[(usize, usize)]) -> SharedMemoryResult<()> {
        let mut table = self.table.lock();
        let needed = batches.iter().filter(|(_, slots)| *slots > 0).count();
        let available = table.available();
        if needed > available {
            return Err(SharedMemoryError::TrackerFull {
                needed,
                available,
                capacity: table.capacity,
            });
        }
        table.entries.extend(
            batches
                .iter()
                .filter(|(_, slots)| *slots > 0)
                .map(|&(queue, remaining)| Countdown { queue, remaining }),
        );
        Ok(())
    }

    /// Fail unless `needed` more batches would fit
    pub fn ensure_available(&self, needed: usize) -> SharedMemoryResult<()> {
        let table = self.table.lock();
        let available = table.available();
        if needed > available {
            return Err(SharedMemoryError::TrackerFull {
                needed,
                available,
                capacity: table.capacity,
            });
        }
        Ok(())
    }

    /// Consume one slot and return its queue index
    pub fn next(&self) -> SharedMemoryResult<usize> {
        self.table.lock().next()
    }

    /// Free entries left in the table
    pub fn available(&self) -> usize {
        self.table.lock().available()
    }

    /// Slots still registered across all queues
    pub fn remaining(&self) -> usize {
        self.table.lock().entries.iter().map(|c| c.remaining).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }
}
