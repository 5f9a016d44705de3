/*!
 * Worker Loop
 * CHECK -> FETCH -> RUN -> REPORT state machine shared by pool threads and
 * callers blocked in `give`
 */

use super::coordinator::{CoordinatorHandle, CoordinatorShared, TaskContext};
use crate::core::id::WorkerId;
use crate::manager::types::FetchInfo;
use crate::manager::WorkStatus;
use crate::monitoring::TaskSpan;
use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, trace, warn};

thread_local! {
    static CURRENT_WORKER: Cell<WorkerId> = const { Cell::new(WorkerId::CALLER) };
    static TASK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Worker running on this thread; `WorkerId::CALLER` outside the pool
pub(crate) fn current_worker() -> WorkerId {
    CURRENT_WORKER.with(Cell::get)
}

/// Whether this thread is inside a task body, at any nesting depth
pub(crate) fn in_task() -> bool {
    TASK_DEPTH.with(Cell::get) > 0
}

/// Marks the current thread as running a task until dropped
struct TaskDepthGuard;

impl TaskDepthGuard {
    fn enter() -> Self {
        TASK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for TaskDepthGuard {
    fn drop(&mut self) {
        TASK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Outcome of one pass through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A task was fetched, run and reported
    Ran,
    /// Nothing to fetch while results are outstanding
    Idle,
    /// Nothing queued and nothing outstanding
    Finished,
}

/// One CHECK and, when a task is available, FETCH -> RUN -> REPORT
pub(crate) fn step(shared: &Arc<CoordinatorShared>, worker: WorkerId) -> Step {
    let allocator = shared.allocator();
    match allocator.check() {
        WorkStatus::Available(claim) => match allocator.get(claim) {
            Ok((info, results_expected)) => {
                run_task(shared, worker, info, results_expected);
                Step::Ran
            }
            Err(e) => {
                error!(worker = %worker, error = %e, "failed to fetch claimed task");
                Step::Idle
            }
        },
        WorkStatus::Waiting => Step::Idle,
        WorkStatus::Finished => Step::Finished,
    }
}

fn run_task(shared: &Arc<CoordinatorShared>, worker: WorkerId, info: FetchInfo, results_expected: bool) {
    let FetchInfo {
        identifier,
        function,
        kwargs,
    } = info;

    let span = TaskSpan::new(function.name(), &identifier);
    let context = TaskContext::new(CoordinatorHandle::from_shared(Arc::clone(shared)), identifier, worker);
    let output = {
        let _depth = TaskDepthGuard::enter();
        span.in_scope(|| function.invoke(&context, kwargs))
    };
    span.finish(output.is_ok());

    shared.stats().record_task(output.is_ok());
    if let Err(failure) = &output {
        warn!(
            worker = %worker,
            group = %identifier.group_id,
            index = identifier.index,
            function = function.name(),
            %failure,
            "task failed"
        );
    }

    if results_expected {
        if let Err(e) = shared.allocator().sort(identifier, output) {
            if shared.is_terminated() {
                warn!(
                    worker = %worker,
                    group = %identifier.group_id,
                    index = identifier.index,
                    "result dropped after shutdown"
                );
                return;
            }
            error!(
                worker = %worker,
                group = %identifier.group_id,
                index = identifier.index,
                error = %e,
                "failed to report task result"
            );
        }
    }
}

/// Pool thread body
///
/// Workers idle rather than exit while the coordinator is open, so a later
/// submission always finds them. They leave once closing and out of work.
pub(crate) fn run(shared: Arc<CoordinatorShared>, worker: WorkerId) {
    CURRENT_WORKER.with(|current| current.set(worker));
    info!(worker = %worker, "worker started");
    let idle = shared.config().idle_interval;
    let mut ran = 0u64;

    loop {
        match step(&shared, worker) {
            Step::Ran => ran += 1,
            Step::Idle | Step::Finished => {
                if shared.is_closing() {
                    break;
                }
                trace!(worker = %worker, "waiting for work");
                thread::sleep(idle);
            }
        }
    }

    info!(worker = %worker, tasks = ran, "worker exiting");
}
