/*!
 * Manager Backends
 * Stack and sorter backends that serialize access to their structures
 */

use super::sorter::ResultsSorter;
use super::stack::{GroupShare, TaskStack};
use super::types::{FetchInfo, TaskOutput, TaskResult};
use crate::core::config::ManagerLayout;
use crate::core::errors::ManagerResult;
use crate::core::id::GroupId;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Role of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Stack,
    Sorter,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Stack => f.write_str("stack"),
            BackendKind::Sorter => f.write_str("sorter"),
        }
    }
}

/// Common lifecycle of manager backends
pub trait ManagerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn id(&self) -> usize;

    /// Release the backend, returning how many items it still held
    fn shutdown(&self) -> usize;
}

/// Backend owning one task stack
pub struct StackManager {
    id: usize,
    /// Sorter backend hosting this stack, when it has no backend of its own
    host: Option<usize>,
    stack: Mutex<TaskStack>,
}

impl StackManager {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            host: None,
            stack: Mutex::new(TaskStack::new(id)),
        }
    }

    /// Stack living inside sorter backend `sorter`
    pub fn hosted_by(sorter: usize) -> Self {
        Self {
            host: Some(sorter),
            ..Self::new(0)
        }
    }

    pub fn host(&self) -> Option<usize> {
        self.host
    }

    pub fn put(&self, share: GroupShare) {
        self.stack.lock().put(share);
    }

    pub fn get(&self) -> ManagerResult<(FetchInfo, bool)> {
        self.stack.lock().get()
    }

    pub fn pending_tasks(&self) -> usize {
        self.stack.lock().pending_tasks()
    }
}

impl ManagerBackend for StackManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Stack
    }

    fn id(&self) -> usize {
        self.id
    }

    fn shutdown(&self) -> usize {
        let dropped = self.stack.lock().clear();
        if dropped > 0 {
            warn!(stack = self.id, dropped, "stack shut down with pending tasks");
        }
        dropped
    }
}

/// Backend owning one results sorter
pub struct SorterManager {
    sorter: ResultsSorter,
}

impl SorterManager {
    pub fn start(id: usize, poll: Duration) -> ManagerResult<Self> {
        Ok(Self {
            sorter: ResultsSorter::start(id, poll)?,
        })
    }

    pub fn put(&self, result: TaskResult) -> ManagerResult<()> {
        self.sorter.put(result)
    }

    pub fn full(&self, group_id: GroupId) -> bool {
        self.sorter.full(group_id)
    }

    pub fn give(&self, group_id: GroupId) -> Vec<(usize, TaskOutput)> {
        self.sorter.give(group_id)
    }
}

impl ManagerBackend for SorterManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Sorter
    }

    fn id(&self) -> usize {
        self.sorter.id()
    }

    fn shutdown(&self) -> usize {
        self.sorter.shutdown();
        let buffered = self.sorter.pending_groups();
        if buffered > 0 {
            warn!(sorter = self.id(), buffered, "sorter shut down with uncollected groups");
        }
        buffered
    }
}

/// Every backend of a layout
pub struct ManagerBackends {
    pub stacks: Vec<StackManager>,
    pub sorters: Vec<SorterManager>,
}

impl ManagerBackends {
    /// Start the backends a layout asks for
    pub fn start(layout: ManagerLayout, poll: Duration) -> ManagerResult<Self> {
        let sorters = (0..layout.sorters)
            .map(|id| SorterManager::start(id, poll))
            .collect::<ManagerResult<Vec<_>>>()?;
        let stacks = if layout.shares_backend() {
            vec![StackManager::hosted_by(0)]
        } else {
            (0..layout.stacks).map(StackManager::new).collect()
        };

        info!(
            stacks = stacks.len(),
            sorters = sorters.len(),
            shared = layout.shares_backend(),
            "manager backends started"
        );
        Ok(Self { stacks, sorters })
    }

    /// Shut every backend down, returning the items they still held
    pub fn shutdown(&self) -> usize {
        self.stacks
            .iter()
            .map(|stack| stack as &dyn ManagerBackend)
            .chain(self.sorters.iter().map(|sorter| sorter as &dyn ManagerBackend))
            .map(|backend| backend.shutdown())
            .sum()
    }
}
