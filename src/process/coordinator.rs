/*!
 * Process Coordinator
 * Fixed worker pool running groups of tasks with nested submission support
 *
 * The pool spawns `workers - 1` threads; the thread blocked in `give` is the
 * last worker and keeps running tasks until its group is complete. A task
 * may submit and await its own sub-group through its `TaskContext`.
 */

use super::stats::{CoordinatorStats, StatsSnapshot};
use super::submission::Submission;
use super::worker::{self, Step};
use crate::core::config::CoordinatorConfig;
use crate::core::errors::{CoordinatorError, Result};
use crate::core::id::WorkerId;
use crate::core::limits::WORKER_THREAD_PREFIX;
use crate::manager::types::{TaskIdentifier, TaskOutput};
use crate::manager::ManagerAllocator;
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// What a running task knows about itself and its coordinator
pub struct TaskContext {
    coordinator: CoordinatorHandle,
    identifier: TaskIdentifier,
    worker: WorkerId,
}

impl TaskContext {
    pub(crate) fn new(coordinator: CoordinatorHandle, identifier: TaskIdentifier, worker: WorkerId) -> Self {
        Self {
            coordinator,
            identifier,
            worker,
        }
    }

    /// Coordinator for nested `submit_tasks` / `give`
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn identifier(&self) -> &TaskIdentifier {
        &self.identifier
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

/// State shared by the coordinator, its handles and its workers
pub(crate) struct CoordinatorShared {
    config: CoordinatorConfig,
    allocator: ManagerAllocator,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closing: AtomicBool,
    stopping: AtomicBool,
    terminated: AtomicBool,
    stats: CoordinatorStats,
}

impl CoordinatorShared {
    pub(crate) fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub(crate) fn allocator(&self) -> &ManagerAllocator {
        &self.allocator
    }

    pub(crate) fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Once closing, only tasks still running may submit; their nested groups
    /// are completed by the thread awaiting them.
    fn submit_tasks(self: &Arc<Self>, submission: Submission) -> Result<Option<TaskIdentifier>> {
        if self.is_terminated() || (self.is_closing() && !worker::in_task()) {
            return Err(CoordinatorError::ShutDown);
        }
        let tasks = submission.number_of_tasks();
        let identifier = self.allocator.submit(submission)?;
        self.stats.record_submission(tasks);
        self.ensure_workers()?;
        Ok(identifier)
    }

    /// Start the pool on first use
    fn ensure_workers(self: &Arc<Self>) -> Result<()> {
        if self.started.load(Ordering::Acquire) || self.is_closing() {
            return Ok(());
        }
        let mut workers = self.workers.lock();
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let threads = self.config.pool_threads();
        for id in 1..=threads {
            let shared = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", WORKER_THREAD_PREFIX, id))
                .spawn(move || worker::run(shared, WorkerId(id)))
                .map_err(|e| CoordinatorError::BackendStartup(format!("worker {}: {}", id, e)))?;
            workers.push(handle);
        }
        info!(threads, "worker pool started");
        Ok(())
    }

    fn give(self: &Arc<Self>, identifier: &TaskIdentifier) -> Result<Vec<TaskOutput>> {
        if self.is_terminated() {
            return Err(CoordinatorError::ShutDown);
        }
        let group_id = identifier.group_id;
        let worker = worker::current_worker();

        loop {
            // Another caller may retrieve the group while this one steals work
            self.allocator.ensure_outstanding(group_id)?;
            if self.allocator.full(identifier) {
                break;
            }
            // Sorters are stopped; results still in flight can no longer arrive
            if self.is_terminated() {
                warn!(group = %group_id, "group abandoned by shutdown");
                return Err(CoordinatorError::ShutDown);
            }
            match worker::step(self, worker) {
                Step::Ran => {}
                Step::Idle => {
                    trace!(group = %group_id, worker = %worker, "waiting for group");
                    thread::sleep(self.config.give_interval);
                }
                Step::Finished => return Err(CoordinatorError::NothingOutstanding(group_id.0)),
            }
        }

        let outputs = self.allocator.give(identifier)?;
        self.stats.record_retrieval();
        debug!(group = %group_id, results = outputs.len(), "group collected");
        Ok(outputs)
    }

    /// Drain queued work, join workers and release the backends; idempotent
    fn shutdown(self: &Arc<Self>) -> Result<()> {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closing.store(true, Ordering::Release);

        // Queued tasks still run, on this thread if the pool is empty
        let worker = worker::current_worker();
        let mut drained = 0u64;
        while worker::step(self, worker) == Step::Ran {
            drained += 1;
        }

        let handles = mem::take(&mut *self.workers.lock());
        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        let uncollected = self.allocator.outstanding_groups();
        if uncollected > 0 {
            warn!(uncollected, "coordinator closed with groups never collected");
        }

        self.terminated.store(true, Ordering::Release);
        self.allocator.shutdown();
        info!(drained, stats = ?self.stats.snapshot(), "process coordinator shut down");

        if panicked > 0 {
            error!(panicked, "worker threads panicked");
            return Err(CoordinatorError::WorkerPanicked(panicked));
        }
        Ok(())
    }
}

/// Cloneable reference to a coordinator, handed to every running task
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<CoordinatorShared>,
}

impl CoordinatorHandle {
    pub(crate) fn from_shared(shared: Arc<CoordinatorShared>) -> Self {
        Self { shared }
    }

    /// Queue a group of tasks, starting the pool on first use
    ///
    /// Returns the identifier to pass to `give`, or `None` for
    /// fire-and-forget submissions.
    pub fn submit_tasks(&self, submission: Submission) -> Result<Option<TaskIdentifier>> {
        self.shared.submit_tasks(submission)
    }

    /// Block until the group is complete, running queued tasks meanwhile
    ///
    /// Outputs come back in index order. A group can be retrieved once; a
    /// second call fails with `AlreadyRetrieved`.
    pub fn give(&self, identifier: &TaskIdentifier) -> Result<Vec<TaskOutput>> {
        self.shared.give(identifier)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Tasks queued and not yet fetched
    pub fn pending_tasks(&self) -> i64 {
        self.shared.allocator.pending_tasks()
    }

    /// Groups awaiting `give`
    pub fn outstanding_groups(&self) -> i64 {
        self.shared.allocator.outstanding_groups()
    }

    /// Whether any queued task or uncollected group remains
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.outstanding_groups() == 0
    }
}

/// Owner of a worker pool and its manager backends
///
/// Dropping the coordinator drains queued tasks, joins every worker and shuts
/// the backends down.
pub struct ProcessCoordinator {
    handle: CoordinatorHandle,
}

impl ProcessCoordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let allocator = ManagerAllocator::new(&config)?;
        info!(
            workers = config.workers,
            managers = %config.managers,
            "process coordinator created"
        );

        let shared = Arc::new(CoordinatorShared {
            config,
            allocator,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            stats: CoordinatorStats::new(),
        });
        Ok(Self {
            handle: CoordinatorHandle::from_shared(shared),
        })
    }

    /// Default configuration with `workers` total workers
    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::new(CoordinatorConfig::new().with_workers(workers))
    }

    /// Run `f` with a coordinator that is shut down on every exit path
    pub fn scope<T, E, F>(config: CoordinatorConfig, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ProcessCoordinator) -> std::result::Result<T, E>,
        E: From<CoordinatorError>,
    {
        let coordinator = Self::new(config)?;
        let outcome = f(&coordinator);
        let exit = coordinator.exit();
        let value = outcome?;
        exit?;
        Ok(value)
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn submit_tasks(&self, submission: Submission) -> Result<Option<TaskIdentifier>> {
        self.handle.submit_tasks(submission)
    }

    pub fn give(&self, identifier: &TaskIdentifier) -> Result<Vec<TaskOutput>> {
        self.handle.give(identifier)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        self.handle.config()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.handle.stats()
    }

    /// Shut down now and report worker panics
    pub fn exit(self) -> Result<()> {
        self.handle.shared.shutdown()
    }
}

impl Drop for ProcessCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.handle.shared.shutdown() {
            error!(error = %e, "coordinator shutdown failed");
        }
    }
}
