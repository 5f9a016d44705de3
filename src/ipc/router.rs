/*!
 * Shared Group Router
 * Fixed-capacity open-addressing table assigning each result of a group to a sorter
 */

use super::shm::{Segment, SegmentKind, SegmentRegistry, SharedHandle, SharedMemoryError, SharedMemoryResult};
use crate::core::id::GroupId;
use crate::core::limits::MAX_TABLE_CAPACITY;
use crate::manager::partition::share_of;
use parking_lot::Mutex;
use std::sync::Arc;

/// Where one result of a group goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteAssignment {
    /// Sorter receiving the result
    pub sorter: usize,
    /// Number of results of the group that sorter receives in total
    pub share: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    group: GroupId,
    total: usize,
    routed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Deleted,
    Occupied(Route),
}

/// Open-addressing table backing the router segment
#[derive(Debug)]
pub struct RouteTable {
    slots: Vec<Slot>,
    mask: usize,
    occupied: usize,
    sorters: usize,
}

impl RouteTable {
    fn new(capacity: usize, sorters: usize) -> Self {
        Self {
            slots: vec![Slot::Empty; capacity],
            mask: capacity - 1,
            occupied: 0,
            sorters,
        }
    }

    #[inline]
    fn home(&self, group: GroupId) -> usize {
        (group.0 as usize) & self.mask
    }

    fn find(&self, group: GroupId) -> Option<usize> {
        let start = self.home(group);
        for probe in 0..self.slots.len() {
            let index = (start + probe) & self.mask;
            match self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(route) if route.group == group => return Some(index),
                _ => {}
            }
        }
        None
    }

    fn insert(&mut self, group: GroupId, total: usize) -> SharedMemoryResult<()> {
        if let Some(index) = self.find(group) {
            self.slots[index] = Slot::Occupied(Route {
                group,
                total,
                routed: 0,
            });
            return Ok(());
        }

        let start = self.home(group);
        let free = (0..self.slots.len())
            .map(|probe| (start + probe) & self.mask)
            .find(|&index| !matches!(self.slots[index], Slot::Occupied(_)))
            .ok_or(SharedMemoryError::RouterFull(self.slots.len()))?;

        self.slots[free] = Slot::Occupied(Route {
            group,
            total,
            routed: 0,
        });
        self.occupied += 1;
        Ok(())
    }

    fn release(&mut self, index: usize) {
        self.slots[index] = Slot::Deleted;
        self.occupied -= 1;
        if self.occupied == 0 {
            // No live chains left, tombstones can go
            self.slots.fill(Slot::Empty);
        }
    }

    fn route(&mut self, group: GroupId) -> SharedMemoryResult<RouteAssignment> {
        let index = self
            .find(group)
            .ok_or(SharedMemoryError::RouteMissing(group.0))?;
        let Slot::Occupied(mut route) = self.slots[index] else {
            return Err(SharedMemoryError::RouteMissing(group.0));
        };

        let queues = self.sorters.min(route.total);
        let sorter = route.routed % queues;
        let share = share_of(route.total, queues, sorter);

        route.routed += 1;
        if route.routed >= route.total {
            self.release(index);
        } else {
            self.slots[index] = Slot::Occupied(route);
        }
        Ok(RouteAssignment { sorter, share })
    }
}

/// Shared group router
///
/// Results of a group are dealt round-robin over `min(sorters, total)`
/// sorters, so each sorter receives exactly its even-partition share.
#[derive(Clone)]
pub struct SharedGroupRouter {
    handle: SharedHandle,
    table: Arc<Mutex<RouteTable>>,
}

impl SharedGroupRouter {
    pub fn create(
        registry: &SegmentRegistry,
        capacity: usize,
        sorters: usize,
    ) -> SharedMemoryResult<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_TABLE_CAPACITY {
            return Err(SharedMemoryError::InvalidCapacity(capacity));
        }
        let table = Arc::new(Mutex::new(RouteTable::new(capacity, sorters.max(1))));
        let handle = registry.create(Segment::Router(Arc::clone(&table)));
        Ok(Self { handle, table })
    }

    pub fn attach(registry: &SegmentRegistry, handle: &SharedHandle) -> SharedMemoryResult<Self> {
        match registry.attach(handle)? {
            Segment::Router(table) => Ok(Self {
                handle: handle.clone(),
                table,
            }),
            other => Err(SharedMemoryError::KindMismatch {
                name: handle.name.clone(),
                expected: SegmentKind::Router,
                found: other.kind(),
            }),
        }
    }

    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// Record that `group` will produce `total_tasks` results
    ///
    /// Empty groups produce nothing to route and take no slot.
    pub fn set(&self, group: GroupId, total_tasks: usize) -> SharedMemoryResult<()> {
        if total_tasks == 0 {
            return Ok(());
        }
        self.table.lock().insert(group, total_tasks)
    }

    /// Assign the next result of `group` to a sorter
    ///
    /// The slot is freed once every result of the group has been routed.
    pub fn get(&self, group: GroupId) -> SharedMemoryResult<RouteAssignment> {
        self.table.lock().route(group)
    }

    /// Drop the entry of `group` if present
    pub fn remove(&self, group: GroupId) -> bool {
        let mut table = self.table.lock();
        match table.find(group) {
            Some(index) => {
                table.release(index);
                true
            }
            None => false,
        }
    }

    /// Groups currently holding a slot
    pub fn len(&self) -> usize {
        self.table.lock().occupied
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().slots.len()
    }
}
