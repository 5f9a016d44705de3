/*!
 * Manager Allocator
 * Single coordination API over every stack and sorter backend
 *
 * Two shared counters drive liveness: `stack_count` holds tasks not yet
 * fetched and `sorter_count` holds groups not yet retrieved. A worker takes a
 * task by decrementing `stack_count`; a decrement that would go below zero is
 * undone under the same lock, so the count never drifts.
 */

use super::backend::{ManagerBackends, SorterManager, StackManager};
use super::partition::{index_ranges, share_of};
use super::stack::{split_different_kwargs, GroupShare, ShareBounds};
use super::types::{FetchInfo, TaskIdentifier, TaskOutput, TaskResult};
use crate::core::bincode;
use crate::core::config::{CoordinatorConfig, ManagerLayout};
use crate::core::errors::{ManagerError, ManagerResult};
use crate::core::id::GroupId;
use crate::ipc::{
    SegmentRegistry, SharedCounter, SharedGroupRouter, SharedHandle, SharedMemoryError,
    SharedQueueIndexTracker,
};
use crate::process::Submission;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Handles of every shared segment an allocator uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorHandles {
    pub group_counter: SharedHandle,
    pub stack_count: SharedHandle,
    pub sorter_count: SharedHandle,
    pub tracker: SharedHandle,
    pub router: SharedHandle,
}

impl AllocatorHandles {
    pub fn to_bytes(&self) -> ManagerResult<Vec<u8>> {
        bincode::to_vec(self).map_err(|e| SharedMemoryError::Encoding(e.to_string()).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> ManagerResult<Self> {
        bincode::from_slice(bytes).map_err(|e| SharedMemoryError::Encoding(e.to_string()).into())
    }

    fn all(&self) -> [&SharedHandle; 5] {
        [
            &self.group_counter,
            &self.stack_count,
            &self.sorter_count,
            &self.tracker,
            &self.router,
        ]
    }
}

/// Liveness answer of `check`
#[derive(Debug)]
pub enum WorkStatus {
    /// A task was reserved for the caller
    Available(TaskClaim),
    /// No task now, but results are still outstanding
    Waiting,
    /// No task queued and no group awaiting retrieval
    Finished,
}

/// Reservation of one task taken from the stack counter
///
/// Dropping an unused claim gives the task back.
#[must_use]
#[derive(Debug)]
pub struct TaskClaim {
    stack_count: SharedCounter,
    consumed: bool,
}

impl TaskClaim {
    fn consume(mut self) {
        self.consumed = true;
    }
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        if !self.consumed {
            self.stack_count.increment(1);
        }
    }
}

/// Allocator fronting the stack and sorter backends
pub struct ManagerAllocator {
    layout: ManagerLayout,
    registry: Arc<SegmentRegistry>,
    backends: ManagerBackends,
    group_counter: SharedCounter,
    stack_count: SharedCounter,
    sorter_count: SharedCounter,
    tracker: SharedQueueIndexTracker,
    router: SharedGroupRouter,
    /// Groups awaiting `give`, with their size
    outstanding: DashMap<GroupId, usize, RandomState>,
    submit_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl ManagerAllocator {
    /// Allocator on the process-wide segment registry
    pub fn new(config: &CoordinatorConfig) -> ManagerResult<Self> {
        Self::with_registry(config, SegmentRegistry::global())
    }

    pub fn with_registry(
        config: &CoordinatorConfig,
        registry: Arc<SegmentRegistry>,
    ) -> ManagerResult<Self> {
        let layout = config.managers;
        if layout.sorters == 0 {
            return Err(ManagerError::BackendStartup(
                "at least one sorter backend is required".to_string(),
            ));
        }

        let tracker = SharedQueueIndexTracker::create(&registry, config.table_capacity)?;
        let router = SharedGroupRouter::create(&registry, config.table_capacity, layout.sorters)?;
        let backends = ManagerBackends::start(layout, config.sorter_poll)?;

        let allocator = Self {
            layout,
            group_counter: SharedCounter::create(&registry, 0),
            stack_count: SharedCounter::create(&registry, 0),
            sorter_count: SharedCounter::create(&registry, 0),
            tracker,
            router,
            backends,
            registry,
            outstanding: DashMap::with_hasher(RandomState::new()),
            submit_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        };
        info!(layout = %layout, capacity = config.table_capacity, "manager allocator ready");
        Ok(allocator)
    }

    pub fn layout(&self) -> ManagerLayout {
        self.layout
    }

    pub fn handles(&self) -> AllocatorHandles {
        AllocatorHandles {
            group_counter: self.group_counter.handle().clone(),
            stack_count: self.stack_count.handle().clone(),
            sorter_count: self.sorter_count.handle().clone(),
            tracker: self.tracker.handle().clone(),
            router: self.router.handle().clone(),
        }
    }

    fn stacks(&self) -> &[StackManager] {
        &self.backends.stacks
    }

    fn sorters(&self) -> &[SorterManager] {
        &self.backends.sorters
    }

    /// Queue a group of tasks
    ///
    /// Returns the identifier to pass to `give` only when results are wanted.
    pub fn submit(&self, submission: Submission) -> ManagerResult<Option<TaskIdentifier>> {
        submission.validate()?;
        let Submission {
            number_of_tasks,
            function,
            results,
            same_kwargs,
            different_kwargs,
            mode,
        } = submission;

        let _guard = self.submit_lock.lock();
        let group_id = GroupId(self.group_counter.increment(1).unsigned_abs());
        let ranges = index_ranges(number_of_tasks, self.stacks().len());

        self.tracker.ensure_available(ranges.len())?;
        if results {
            self.router.set(group_id, number_of_tasks)?;
            self.outstanding.insert(group_id, number_of_tasks);
            self.sorter_count.increment(1);
        }

        let same_kwargs = Arc::new(same_kwargs);
        let slices = split_different_kwargs(different_kwargs, mode, number_of_tasks, &ranges);
        let mut batches = Vec::with_capacity(ranges.len());
        for (share, (range, slice)) in ranges.iter().zip(slices).enumerate() {
            let stack = (group_id.0 as usize + share) % self.stacks().len();
            let bounds = ShareBounds {
                group_id,
                total_tasks: number_of_tasks,
                first: range.start,
                last: range.end - 1,
            };
            self.stacks()[stack].put(GroupShare::new(
                bounds,
                function.clone(),
                Arc::clone(&same_kwargs),
                slice,
                mode,
                results,
            ));
            batches.push((stack, range.len()));
        }

        self.tracker.add_many(&batches)?;
        self.stack_count.increment(number_of_tasks as i64);

        debug!(
            group = %group_id,
            tasks = number_of_tasks,
            shares = batches.len(),
            function = function.name(),
            results,
            "group submitted"
        );
        Ok(results.then(|| TaskIdentifier::new(group_id, 0, number_of_tasks)))
    }

    /// Tri-state liveness check used by every worker loop
    pub fn check(&self) -> WorkStatus {
        if self.stack_count.try_decrement(1).is_some() {
            return WorkStatus::Available(TaskClaim {
                stack_count: self.stack_count.clone(),
                consumed: false,
            });
        }
        if self.sorter_count.value() > 0 {
            WorkStatus::Waiting
        } else {
            WorkStatus::Finished
        }
    }

    /// Fetch the task a claim reserved
    pub fn get(&self, claim: TaskClaim) -> ManagerResult<(FetchInfo, bool)> {
        let queue = self.tracker.next()?;
        let fetched = self.stacks()[queue].get()?;
        claim.consume();
        Ok(fetched)
    }

    /// Route a task outcome to the sorter owning its group
    pub fn sort(&self, mut identifier: TaskIdentifier, data: TaskOutput) -> ManagerResult<()> {
        let route = self.router.get(identifier.group_id)?;
        identifier.group_tasks = route.share;
        self.sorters()[route.sorter].put(TaskResult { identifier, data })
    }

    /// Whether every sorter holding part of the group has its share
    pub fn full(&self, identifier: &TaskIdentifier) -> bool {
        let queues = self.sorters().len().min(identifier.total_tasks);
        self.sorters()[..queues]
            .iter()
            .all(|sorter| sorter.full(identifier.group_id))
    }

    /// Whether `give` may still be called for the group
    pub fn is_outstanding(&self, group_id: GroupId) -> bool {
        self.outstanding.contains_key(&group_id)
    }

    /// Fail the way `give` would for a group that is not outstanding
    pub fn ensure_outstanding(&self, group_id: GroupId) -> ManagerResult<()> {
        if self.is_outstanding(group_id) {
            Ok(())
        } else {
            Err(self.not_outstanding(group_id))
        }
    }

    fn not_outstanding(&self, group_id: GroupId) -> ManagerError {
        let issued = u64::try_from(self.group_counter.value()).unwrap_or(0);
        if group_id.0 >= 1 && group_id.0 <= issued {
            ManagerError::AlreadyRetrieved(group_id.0)
        } else {
            ManagerError::UnknownGroup(group_id.0)
        }
    }

    /// Collect a group's outputs in index order; at most once per group
    ///
    /// Blocks until every share is complete; callers wait on `full` first.
    pub fn give(&self, identifier: &TaskIdentifier) -> ManagerResult<Vec<TaskOutput>> {
        let group_id = identifier.group_id;
        let Some((_, total)) = self.outstanding.remove(&group_id) else {
            return Err(self.not_outstanding(group_id));
        };

        let queues = self.sorters().len().min(total);
        let mut members = Vec::with_capacity(total);
        for sorter in &self.sorters()[..queues] {
            members.extend(sorter.give(group_id));
        }
        members.sort_unstable_by_key(|(index, _)| *index);
        self.sorter_count.decrement(1);

        debug!(group = %group_id, results = members.len(), "group retrieved");
        Ok(members.into_iter().map(|(_, data)| data).collect())
    }

    /// Tasks queued and not yet fetched
    pub fn pending_tasks(&self) -> i64 {
        self.stack_count.value()
    }

    /// Groups submitted with results and not yet retrieved
    pub fn outstanding_groups(&self) -> i64 {
        self.sorter_count.value()
    }

    /// Expected results per sorter for a group of `total` tasks
    pub fn sorter_shares(&self, total: usize) -> Vec<usize> {
        let queues = self.sorters().len().min(total);
        (0..queues).map(|j| share_of(total, queues, j)).collect()
    }

    /// Stop sorter threads, drop queued tasks and unlink shared segments
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let leftover = self.backends.shutdown();
        for handle in self.handles().all() {
            self.registry.unlink(handle);
        }
        info!(leftover, "manager allocator shut down");
    }
}

impl Drop for ManagerAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
