/*!
 * Even Partitioning
 * Splits a task count across queues as evenly as possible
 */

use std::ops::Range;

/// Split `number_of_tasks` over `nb_of_queues` queues
///
/// The first `number_of_tasks % nb_of_queues` queues get one extra task and
/// queues that would get nothing are dropped, so the result may be shorter
/// than `nb_of_queues`.
///
/// Zero queues yield an empty partition. A layout with no sorter is rejected
/// by `ManagerLayout::split` and the stack count is clamped to one, so the
/// allocator never partitions over zero queues.
pub fn valid_indexes(number_of_tasks: usize, nb_of_queues: usize) -> Vec<usize> {
    if number_of_tasks == 0 || nb_of_queues == 0 {
        return Vec::new();
    }
    let (coef, res) = (number_of_tasks / nb_of_queues, number_of_tasks % nb_of_queues);
    (0..nb_of_queues)
        .map(|queue| coef + usize::from(queue < res))
        .filter(|&share| share > 0)
        .collect()
}

/// Share of queue `queue` under `valid_indexes(total, queues)`, zero when dropped
#[inline]
pub fn share_of(total: usize, queues: usize, queue: usize) -> usize {
    if queues == 0 || queue >= queues {
        return 0;
    }
    total / queues + usize::from(queue < total % queues)
}

/// Items `[start, end)` of a `len`-item list that part `part` of `parts` receives
///
/// Same even rule as `valid_indexes`, but empty parts are allowed.
#[inline]
pub fn chunk_bounds(len: usize, parts: usize, part: usize) -> Range<usize> {
    chunk_start(len, parts, part)..chunk_start(len, parts, part + 1)
}

#[inline]
fn chunk_start(len: usize, parts: usize, part: usize) -> usize {
    if parts == 0 {
        return 0;
    }
    let part = part.min(parts);
    let (coef, res) = (len / parts, len % parts);
    part * coef + part.min(res)
}

/// Consecutive index ranges matching `valid_indexes`
pub fn index_ranges(number_of_tasks: usize, nb_of_queues: usize) -> Vec<Range<usize>> {
    let mut start = 0;
    valid_indexes(number_of_tasks, nb_of_queues)
        .into_iter()
        .map(|share| {
            let range = start..start + share;
            start += share;
            range
        })
        .collect()
}
