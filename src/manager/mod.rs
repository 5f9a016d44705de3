/*!
 * Manager Module
 * Task stacks, results sorters and the allocator coordinating them
 */

pub mod allocator;
pub mod backend;
pub mod partition;
pub mod sorter;
pub mod stack;
pub mod types;

// Re-export public API
pub use allocator::{AllocatorHandles, ManagerAllocator, TaskClaim, WorkStatus};
pub use backend::{BackendKind, ManagerBackend, ManagerBackends, SorterManager, StackManager};
pub use partition::valid_indexes;
pub use sorter::ResultsSorter;
pub use stack::{GroupShare, TaskStack};
pub use types::{
    DifferentKwargs, FetchInfo, Kwargs, KwargsMode, SameGroupAccumulator, TaskFailure,
    TaskFunction, TaskIdentifier, TaskOutput, TaskResult,
};
