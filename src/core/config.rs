/*!
 * Coordinator Configuration
 *
 * Pool size, manager layout, table capacity and poll intervals.
 */

use super::errors::{CoordinatorError, Result};
use super::limits::{
    DEFAULT_GIVE_INTERVAL, DEFAULT_IDLE_INTERVAL, DEFAULT_SORTER_POLL, DEFAULT_TABLE_CAPACITY,
    MAX_TABLE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// Number of stack and sorter backends
///
/// `stacks == 0` means the first sorter backend also hosts the task stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerLayout {
    pub stacks: usize,
    pub sorters: usize,
}

impl ManagerLayout {
    /// Layout for a single manager count
    ///
    /// One manager hosts both roles; more managers dedicate one to the stack
    /// and the rest to sorting.
    pub fn from_count(managers: usize) -> Result<Self> {
        match managers {
            0 => Err(CoordinatorError::Configuration(
                "at least one manager is required".to_string(),
            )),
            1 => Ok(Self {
                stacks: 0,
                sorters: 1,
            }),
            n => Ok(Self {
                stacks: 1,
                sorters: n - 1,
            }),
        }
    }

    /// Explicit `(stacks, sorters)` layout
    pub fn split(stacks: usize, sorters: usize) -> Result<Self> {
        if sorters == 0 {
            return Err(CoordinatorError::Configuration(
                "at least one sorter manager is required".to_string(),
            ));
        }
        Ok(Self { stacks, sorters })
    }

    /// Task stacks actually created
    #[inline]
    pub fn stack_backends(&self) -> usize {
        self.stacks.max(1)
    }

    /// Whether the stack lives inside the first sorter backend
    #[inline]
    pub fn shares_backend(&self) -> bool {
        self.stacks == 0
    }
}

impl Default for ManagerLayout {
    fn default() -> Self {
        Self {
            stacks: 0,
            sorters: 1,
        }
    }
}

impl FromStr for ManagerLayout {
    type Err = CoordinatorError;

    /// Parses `"3"` (a manager count) or `"3,2"` (stacks, sorters)
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim().parse::<usize>().map_err(|e| {
                CoordinatorError::Configuration(format!("invalid manager count '{}': {}", part, e))
            })
        };
        match s.split_once(',') {
            Some((stacks, sorters)) => Self::split(parse(stacks)?, parse(sorters)?),
            None => Self::from_count(parse(s)?),
        }
    }
}

impl fmt::Display for ManagerLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stack(s), {} sorter(s)", self.stacks, self.sorters)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Total workers including the caller (default: available parallelism)
    pub workers: usize,

    /// Stack and sorter backends (default: one shared backend)
    pub managers: ManagerLayout,

    /// Capacity of the tracker and router tables (default: 1024)
    pub table_capacity: usize,

    /// Worker sleep when no task is available (default: 5ms)
    pub idle_interval: Duration,

    /// Sleep of a blocked `give` that found nothing to steal (default: 1ms)
    pub give_interval: Duration,

    /// Condition variable wait granularity of sorters (default: 50ms)
    pub sorter_poll: Duration,
}

impl CoordinatorConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            managers: ManagerLayout::default(),
            table_capacity: DEFAULT_TABLE_CAPACITY,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            give_interval: DEFAULT_GIVE_INTERVAL,
            sorter_poll: DEFAULT_SORTER_POLL,
        }
    }

    /// No pool threads; every task runs on the thread blocked in `give`
    pub fn single_threaded() -> Self {
        Self::new().with_workers(1)
    }

    /// Dedicated stack and sorter backends
    pub fn sharded(stacks: usize, sorters: usize) -> Result<Self> {
        Ok(Self::new().with_managers(ManagerLayout::split(stacks, sorters)?))
    }

    /// Defaults overridden by `COORDINATOR_*` environment variables
    ///
    /// Environment variables:
    /// - COORDINATOR_WORKERS: total workers
    /// - COORDINATOR_MANAGERS: `"3"` or `"3,2"`
    /// - COORDINATOR_TABLE_CAPACITY: tracker and router capacity
    /// - COORDINATOR_IDLE_MS: worker idle sleep in milliseconds
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();
        if let Some(workers) = env_number("COORDINATOR_WORKERS")? {
            config.workers = workers;
        }
        if let Ok(managers) = std::env::var("COORDINATOR_MANAGERS") {
            config.managers = managers.parse()?;
        }
        if let Some(capacity) = env_number("COORDINATOR_TABLE_CAPACITY")? {
            config.table_capacity = capacity;
        }
        if let Some(idle) = env_number("COORDINATOR_IDLE_MS")? {
            config.idle_interval = Duration::from_millis(idle as u64);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_managers(mut self, managers: ManagerLayout) -> Self {
        self.managers = managers;
        self
    }

    pub fn with_table_capacity(mut self, capacity: usize) -> Self {
        self.table_capacity = capacity;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_give_interval(mut self, interval: Duration) -> Self {
        self.give_interval = interval;
        self
    }

    pub fn with_sorter_poll(mut self, poll: Duration) -> Self {
        self.sorter_poll = poll;
        self
    }

    /// Pool threads spawned; the caller of `give` is the remaining worker
    #[inline]
    pub fn pool_threads(&self) -> usize {
        self.workers.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CoordinatorError::Configuration(
                "at least one worker is required".to_string(),
            ));
        }
        if self.managers.sorters == 0 {
            return Err(CoordinatorError::Configuration(
                "at least one sorter manager is required".to_string(),
            ));
        }
        if !self.table_capacity.is_power_of_two() || self.table_capacity > MAX_TABLE_CAPACITY {
            return Err(CoordinatorError::Configuration(format!(
                "table capacity {} must be a power of two no larger than {}",
                self.table_capacity, MAX_TABLE_CAPACITY
            )));
        }
        if self.sorter_poll.is_zero() {
            return Err(CoordinatorError::Configuration(
                "sorter poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_number(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e| {
            CoordinatorError::Configuration(format!("{}='{}' is not a number: {}", key, raw, e))
        }),
        Err(_) => Ok(None),
    }
}
