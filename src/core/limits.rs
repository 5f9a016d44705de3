/*!
 * Coordinator Limits and Constants
 *
 * Centralized location for capacities, poll intervals and naming prefixes.
 * Organized by domain: shared tables, polling, naming.
 */

use std::time::Duration;

// =============================================================================
// SHARED TABLE LIMITS
// =============================================================================

/// Default capacity of the queue index tracker and the group router (1024)
/// Must be a power of two; bounds the number of in-flight groups
pub const DEFAULT_TABLE_CAPACITY: usize = 1024;

/// Upper bound accepted for a table capacity (1M slots)
pub const MAX_TABLE_CAPACITY: usize = 1 << 20;

// =============================================================================
// POLLING INTERVALS
// =============================================================================

/// Sleep of a worker that found no task while results are outstanding
/// [PERF] Bounds idle CPU usage of the pool
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep of a caller blocked in `give` when no task could be stolen
pub const DEFAULT_GIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Granularity of the condition variable wait inside a results sorter
pub const DEFAULT_SORTER_POLL: Duration = Duration::from_millis(50);

// =============================================================================
// NAMING
// =============================================================================

/// Prefix of every shared segment name
pub const SEGMENT_PREFIX: &str = "psm_";

/// Thread name prefix of pool workers
pub const WORKER_THREAD_PREFIX: &str = "coordinator-worker";

/// Thread name prefix of sorter drain threads
pub const SORTER_THREAD_PREFIX: &str = "coordinator-sorter";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_capacity_is_power_of_two() {
        assert!(DEFAULT_TABLE_CAPACITY.is_power_of_two());
        assert!(MAX_TABLE_CAPACITY.is_power_of_two());
        assert!(DEFAULT_TABLE_CAPACITY <= MAX_TABLE_CAPACITY);
    }

    #[test]
    fn test_give_polls_faster_than_idle() {
        assert!(DEFAULT_GIVE_INTERVAL <= DEFAULT_IDLE_INTERVAL);
    }
}
