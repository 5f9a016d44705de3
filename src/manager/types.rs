/*!
 * Manager Types
 * Task descriptors, results and per-group accumulators
 */

use crate::core::id::GroupId;
use crate::process::TaskContext;
use ahash::RandomState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Keyword arguments handed to a task function
pub type Kwargs = serde_json::Map<String, Value>;

/// Per-task keyword values, one list per argument name
pub type DifferentKwargs = BTreeMap<String, Vec<Value>>;

/// What a task produced: its value or a captured failure
pub type TaskOutput = Result<Value, TaskFailure>;

/// How `different_kwargs` lists map onto the tasks of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KwargsMode {
    /// Exactly one value per task
    #[default]
    PerTask,
    /// Each list is chunked evenly; every task receives an array
    Split,
}

/// Identifies one task inside one submission group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentifier {
    /// Position within the group, in `[0, total_tasks)`
    pub index: usize,
    pub group_id: GroupId,
    /// Size of the group
    pub total_tasks: usize,
    /// Results the receiving sorter expects for this group; stamped when sorted
    pub group_tasks: usize,
}

impl TaskIdentifier {
    pub fn new(group_id: GroupId, index: usize, total_tasks: usize) -> Self {
        Self {
            index,
            group_id,
            total_tasks,
            group_tasks: 0,
        }
    }
}

/// Captured failure of a task body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Keeps a `TaskFailure` returned by the task as is
    pub fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<TaskFailure>() {
            Some(failure) => failure.clone(),
            None => Self::new("Error", format!("{:#}", error)),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new("Panic", message)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exception: {}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskFailure {}

type TaskCallable = dyn Fn(&TaskContext, Kwargs) -> anyhow::Result<Value> + Send + Sync;

/// Named user callable run by workers
#[derive(Clone)]
pub struct TaskFunction {
    name: Arc<str>,
    call: Arc<TaskCallable>,
}

impl TaskFunction {
    pub fn new<F>(name: &str, call: F) -> Self
    where
        F: Fn(&TaskContext, Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the callable; errors and panics become a `TaskFailure`
    pub fn invoke(&self, context: &TaskContext, kwargs: Kwargs) -> TaskOutput {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.call)(context, kwargs))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(TaskFailure::from_error(&error)),
            Err(payload) => Err(TaskFailure::from_panic(payload.as_ref())),
        }
    }
}

impl fmt::Debug for TaskFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Task descriptor, consumed exactly once by a worker
#[derive(Debug, Clone)]
pub struct FetchInfo {
    pub identifier: TaskIdentifier,
    pub function: TaskFunction,
    pub kwargs: Kwargs,
}

/// Outcome of one task on its way to a sorter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub identifier: TaskIdentifier,
    pub data: TaskOutput,
}

/// Results of one group collected by one sorter
#[derive(Debug)]
pub struct SameGroupAccumulator {
    pub group_id: GroupId,
    pub expected_count: usize,
    received: HashSet<usize, RandomState>,
    data: Vec<(usize, TaskOutput)>,
    is_complete: bool,
}

impl SameGroupAccumulator {
    pub fn new(group_id: GroupId, expected_count: usize) -> Self {
        Self {
            group_id,
            expected_count,
            received: HashSet::with_capacity_and_hasher(expected_count, RandomState::new()),
            data: Vec::with_capacity(expected_count),
            is_complete: expected_count == 0,
        }
    }

    /// Add a result; duplicates of an index already received are rejected
    pub fn push(&mut self, result: TaskResult) -> bool {
        let index = result.identifier.index;
        if !self.received.insert(index) {
            return false;
        }
        self.data.push((index, result.data));
        self.is_complete = self.received.len() >= self.expected_count;
        true
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Members ordered by index
    pub fn into_sorted(mut self) -> Vec<(usize, TaskOutput)> {
        self.data.sort_unstable_by_key(|(index, _)| *index);
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn result(group: u64, index: usize, share: usize) -> TaskResult {
        let mut identifier = TaskIdentifier::new(GroupId(group), index, 10);
        identifier.group_tasks = share;
        TaskResult {
            identifier,
            data: Ok(json!(index)),
        }
    }

    #[test]
    fn test_failure_display() {
        let failure = TaskFailure::new("ValueError", "bad input");
        assert_eq!(failure.to_string(), "Exception: ValueError: bad input");
    }

    #[test]
    fn test_failure_from_error_keeps_typed_failure() {
        let error = anyhow::Error::new(TaskFailure::new("Timeout", "too slow"));
        assert_eq!(
            TaskFailure::from_error(&error),
            TaskFailure::new("Timeout", "too slow")
        );

        let error = anyhow::anyhow!("disk full").context("writing output");
        let failure = TaskFailure::from_error(&error);
        assert_eq!(failure.kind, "Error");
        assert_eq!(failure.message, "writing output: disk full");
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(TaskFailure::from_panic(payload.as_ref()).message, "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(TaskFailure::from_panic(payload.as_ref()).message, "owned boom");
    }

    #[test]
    fn test_accumulator_completes_on_expected_count() {
        let mut acc = SameGroupAccumulator::new(GroupId(1), 3);
        assert!(acc.push(result(1, 7, 3)));
        assert!(acc.push(result(1, 1, 3)));
        assert!(!acc.is_complete());
        assert!(acc.push(result(1, 4, 3)));
        assert!(acc.is_complete());

        let indexes: Vec<usize> = acc.into_sorted().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indexes, vec![1, 4, 7]);
    }

    #[test]
    fn test_accumulator_ignores_duplicates() {
        let mut acc = SameGroupAccumulator::new(GroupId(1), 2);
        assert!(acc.push(result(1, 0, 2)));
        assert!(!acc.push(result(1, 0, 2)));
        assert_eq!(acc.received_count(), 1);
        assert!(!acc.is_complete());
    }
}
