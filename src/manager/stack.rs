/*!
 * Task Stack
 * Pending task groups expanded lazily, one task descriptor at a time
 */

use super::partition::chunk_bounds;
use super::types::{DifferentKwargs, FetchInfo, Kwargs, KwargsMode, TaskFunction, TaskIdentifier};
use crate::core::errors::{ManagerError, ManagerResult};
use crate::core::id::GroupId;
use serde_json::Value;
use std::mem;
use std::ops::Range;
use std::sync::Arc;

/// Slice of one `different_kwargs` list routed to a share
#[derive(Debug, Clone, PartialEq)]
pub struct KwargSlice {
    pub name: String,
    /// Length of the list before slicing
    pub full_len: usize,
    pub values: Vec<Value>,
}

/// Tasks `[first, last]` of a group held by one stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareBounds {
    pub group_id: GroupId,
    pub total_tasks: usize,
    pub first: usize,
    pub last: usize,
}

/// Cut each `different_kwargs` list into the slices the given task ranges need
///
/// Lists are split from the back with `split_off`, so no value is copied.
pub fn split_different_kwargs(
    different: DifferentKwargs,
    mode: KwargsMode,
    total_tasks: usize,
    ranges: &[Range<usize>],
) -> Vec<Vec<KwargSlice>> {
    let mut per_share: Vec<Vec<KwargSlice>> = ranges.iter().map(|_| Vec::new()).collect();
    for (name, mut values) in different {
        let full_len = values.len();
        for (slot, range) in ranges.iter().enumerate().rev() {
            let start = match mode {
                KwargsMode::PerTask => range.start.min(values.len()),
                KwargsMode::Split => chunk_bounds(full_len, total_tasks, range.start).start,
            };
            let values = values.split_off(start);
            per_share[slot].push(KwargSlice {
                name: name.clone(),
                full_len,
                values,
            });
        }
    }
    per_share
}

/// One group's share on a stack, iterated lazily
#[derive(Debug)]
pub struct GroupShare {
    bounds: ShareBounds,
    next: usize,
    function: TaskFunction,
    same_kwargs: Arc<Kwargs>,
    different_kwargs: Vec<KwargSlice>,
    mode: KwargsMode,
    results_expected: bool,
}

impl GroupShare {
    pub fn new(
        bounds: ShareBounds,
        function: TaskFunction,
        same_kwargs: Arc<Kwargs>,
        different_kwargs: Vec<KwargSlice>,
        mode: KwargsMode,
        results_expected: bool,
    ) -> Self {
        Self {
            next: bounds.first,
            bounds,
            function,
            same_kwargs,
            different_kwargs,
            mode,
            results_expected,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.bounds.group_id
    }

    pub fn results_expected(&self) -> bool {
        self.results_expected
    }

    /// Tasks not yet handed out
    pub fn remaining(&self) -> usize {
        (self.bounds.last + 1).saturating_sub(self.next)
    }

    fn value_for(&mut self, slot: usize, index: usize) -> Value {
        let bounds = self.bounds;
        let slice = &mut self.different_kwargs[slot];
        match self.mode {
            KwargsMode::PerTask => slice
                .values
                .get_mut(index - bounds.first)
                .map(mem::take)
                .unwrap_or(Value::Null),
            KwargsMode::Split => {
                let base = chunk_bounds(slice.full_len, bounds.total_tasks, bounds.first).start;
                let chunk = chunk_bounds(slice.full_len, bounds.total_tasks, index);
                let taken = slice
                    .values
                    .get_mut(chunk.start - base..chunk.end - base)
                    .map(|values| values.iter_mut().map(mem::take).collect())
                    .unwrap_or_default();
                Value::Array(taken)
            }
        }
    }
}

impl Iterator for GroupShare {
    type Item = FetchInfo;

    fn next(&mut self) -> Option<FetchInfo> {
        if self.next > self.bounds.last {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let mut kwargs = Kwargs::clone(&self.same_kwargs);
        for slot in 0..self.different_kwargs.len() {
            let value = self.value_for(slot, index);
            kwargs.insert(self.different_kwargs[slot].name.clone(), value);
        }

        Some(FetchInfo {
            identifier: TaskIdentifier::new(self.bounds.group_id, index, self.bounds.total_tasks),
            function: self.function.clone(),
            kwargs,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Stack of pending group shares
///
/// Memory grows with the number of groups, not the number of tasks.
#[derive(Debug)]
pub struct TaskStack {
    id: usize,
    shares: Vec<GroupShare>,
}

impl TaskStack {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            shares: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn put(&mut self, share: GroupShare) {
        if share.remaining() > 0 {
            self.shares.push(share);
        }
    }

    /// Next task of the top group and whether its result is wanted
    pub fn get(&mut self) -> ManagerResult<(FetchInfo, bool)> {
        while let Some(top) = self.shares.last_mut() {
            match top.next() {
                Some(info) => {
                    let results_expected = top.results_expected();
                    if top.remaining() == 0 {
                        self.shares.pop();
                    }
                    return Ok((info, results_expected));
                }
                None => {
                    self.shares.pop();
                }
            }
        }
        Err(ManagerError::EmptyStack(self.id))
    }

    pub fn pending_tasks(&self) -> usize {
        self.shares.iter().map(GroupShare::remaining).sum()
    }

    pub fn pending_groups(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Drop every pending share, returning the number of tasks discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending_tasks();
        self.shares.clear();
        dropped
    }
}
