/*!
 * Results Sorter
 * Groups incoming task results by submission and hands back completed groups
 *
 * `put` only enqueues; a drain thread moves pending results into per-group
 * accumulators and wakes waiters when a group completes.
 */

use super::types::{SameGroupAccumulator, TaskOutput, TaskResult};
use crate::core::errors::{ManagerError, ManagerResult};
use crate::core::id::GroupId;
use crate::core::limits::SORTER_THREAD_PREFIX;
use ahash::RandomState;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

enum SorterMessage {
    Result(TaskResult),
    Shutdown,
}

struct SorterState {
    groups: Mutex<HashMap<GroupId, SameGroupAccumulator, RandomState>>,
    completed: Condvar,
}

impl SorterState {
    fn accumulate(&self, sorter: usize, result: TaskResult) {
        let group_id = result.identifier.group_id;
        let index = result.identifier.index;
        let mut groups = self.groups.lock();
        let accumulator = groups
            .entry(group_id)
            .or_insert_with(|| SameGroupAccumulator::new(group_id, result.identifier.group_tasks));

        if !accumulator.push(result) {
            warn!(sorter, group = %group_id, index, "duplicate result ignored");
            return;
        }
        if accumulator.is_complete() {
            debug!(sorter, group = %group_id, count = accumulator.received_count(), "group share complete");
            self.completed.notify_all();
        }
    }
}

/// Per-backend results sorter
pub struct ResultsSorter {
    id: usize,
    sender: flume::Sender<SorterMessage>,
    state: Arc<SorterState>,
    drain: Mutex<Option<JoinHandle<()>>>,
    poll: Duration,
}

impl ResultsSorter {
    /// Start a sorter and its drain thread
    pub fn start(id: usize, poll: Duration) -> ManagerResult<Self> {
        let (sender, receiver) = flume::unbounded::<SorterMessage>();
        let state = Arc::new(SorterState {
            groups: Mutex::new(HashMap::with_hasher(RandomState::new())),
            completed: Condvar::new(),
        });

        let drain_state = Arc::clone(&state);
        let drain = thread::Builder::new()
            .name(format!("{}-{}", SORTER_THREAD_PREFIX, id))
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        SorterMessage::Result(result) => drain_state.accumulate(id, result),
                        SorterMessage::Shutdown => break,
                    }
                }
                debug!(sorter = id, "drain thread stopped");
            })
            .map_err(|e| ManagerError::BackendStartup(format!("sorter {}: {}", id, e)))?;

        Ok(Self {
            id,
            sender,
            state,
            drain: Mutex::new(Some(drain)),
            poll,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Enqueue a result without touching the accumulators
    pub fn put(&self, result: TaskResult) -> ManagerResult<()> {
        self.sender
            .send(SorterMessage::Result(result))
            .map_err(|_| ManagerError::SorterClosed(self.id))
    }

    /// Whether this sorter's share of `group_id` has fully arrived
    pub fn full(&self, group_id: GroupId) -> bool {
        self.state
            .groups
            .lock()
            .get(&group_id)
            .is_some_and(SameGroupAccumulator::is_complete)
    }

    /// Non-blocking `give`: the ordered members if complete
    pub fn try_give(&self, group_id: GroupId) -> Option<Vec<(usize, TaskOutput)>> {
        let mut groups = self.state.groups.lock();
        if groups.get(&group_id).is_some_and(SameGroupAccumulator::is_complete) {
            groups.remove(&group_id).map(SameGroupAccumulator::into_sorted)
        } else {
            None
        }
    }

    /// Wait until the share of `group_id` is complete, then remove and return it
    pub fn give(&self, group_id: GroupId) -> Vec<(usize, TaskOutput)> {
        let mut groups = self.state.groups.lock();
        loop {
            if groups.get(&group_id).is_some_and(SameGroupAccumulator::is_complete) {
                if let Some(accumulator) = groups.remove(&group_id) {
                    return accumulator.into_sorted();
                }
            }
            self.state.completed.wait_for(&mut groups, self.poll);
        }
    }

    /// Groups currently buffered
    pub fn pending_groups(&self) -> usize {
        self.state.groups.lock().len()
    }

    /// Stop the drain thread; idempotent
    pub fn shutdown(&self) {
        let Some(handle) = self.drain.lock().take() else {
            return;
        };
        // The drain thread only stops on the marker or a closed channel
        let _ = self.sender.send(SorterMessage::Shutdown);
        if handle.join().is_err() {
            error!(sorter = self.id, "drain thread panicked");
        }
    }
}

impl Drop for ResultsSorter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::types::{TaskFailure, TaskIdentifier};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn result(group: u64, index: usize, share: usize, data: TaskOutput) -> TaskResult {
        let mut identifier = TaskIdentifier::new(GroupId(group), index, share);
        identifier.group_tasks = share;
        TaskResult { identifier, data }
    }

    fn sorter() -> ResultsSorter {
        ResultsSorter::start(0, Duration::from_millis(5)).unwrap()
    }

    #[test]
    fn test_give_returns_sorted_members() {
        let sorter = sorter();
        for index in [2, 0, 1] {
            sorter.put(result(1, index, 3, Ok(json!(index)))).unwrap();
        }

        let members = sorter.give(GroupId(1));
        assert_eq!(
            members,
            vec![(0, Ok(json!(0))), (1, Ok(json!(1))), (2, Ok(json!(2)))]
        );
        assert_eq!(sorter.pending_groups(), 0);
    }

    #[test]
    fn test_full_only_after_last_result() {
        let sorter = sorter();
        sorter.put(result(4, 0, 2, Ok(Value::Null))).unwrap();
        assert!(!sorter.full(GroupId(4)));
        assert!(sorter.try_give(GroupId(4)).is_none());

        sorter
            .put(result(4, 1, 2, Err(TaskFailure::new("Error", "x"))))
            .unwrap();
        let members = sorter.give(GroupId(4));
        assert_eq!(members.len(), 2);
        assert!(members[1].1.is_err());
        assert!(!sorter.full(GroupId(4)));
    }

    #[test]
    fn test_give_blocks_until_complete() {
        let sorter = Arc::new(sorter());
        let producer = Arc::clone(&sorter);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(result(9, 0, 1, Ok(json!("late")))).unwrap();
        });

        assert_eq!(sorter.give(GroupId(9)), vec![(0, Ok(json!("late")))]);
        handle.join().unwrap();
    }

    #[test]
    fn test_put_after_shutdown_fails() {
        let sorter = sorter();
        sorter.shutdown();
        sorter.shutdown();
        assert_eq!(
            sorter.put(result(1, 0, 1, Ok(Value::Null))),
            Err(ManagerError::SorterClosed(0))
        );
    }
}
