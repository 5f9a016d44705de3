/*!
 * Submission Builder
 * Describes one group of tasks handed to `submit_tasks`
 */

use crate::core::errors::{ManagerError, ManagerResult};
use crate::manager::types::{DifferentKwargs, Kwargs, KwargsMode, TaskFunction};
use serde_json::Value;

/// A group of `number_of_tasks` calls of one function
#[derive(Debug, Clone)]
pub struct Submission {
    pub(crate) number_of_tasks: usize,
    pub(crate) function: TaskFunction,
    pub(crate) results: bool,
    pub(crate) same_kwargs: Kwargs,
    pub(crate) different_kwargs: DifferentKwargs,
    pub(crate) mode: KwargsMode,
}

impl Submission {
    /// Results are collected unless `fire_and_forget` is called
    pub fn new(number_of_tasks: usize, function: TaskFunction) -> Self {
        Self {
            number_of_tasks,
            function,
            results: true,
            same_kwargs: Kwargs::new(),
            different_kwargs: DifferentKwargs::new(),
            mode: KwargsMode::PerTask,
        }
    }

    /// Run without collecting results; no identifier is returned
    pub fn fire_and_forget(mut self) -> Self {
        self.results = false;
        self
    }

    /// Argument passed unchanged to every task
    pub fn same(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.same_kwargs.insert(name.into(), value.into());
        self
    }

    /// Argument taking one value per task (or a chunk per task in split mode)
    pub fn different<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.different_kwargs
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Chunk `different` lists evenly across tasks instead of one value each
    pub fn split_kwargs(mut self) -> Self {
        self.mode = KwargsMode::Split;
        self
    }

    pub fn number_of_tasks(&self) -> usize {
        self.number_of_tasks
    }

    pub fn wants_results(&self) -> bool {
        self.results
    }

    pub fn function(&self) -> &TaskFunction {
        &self.function
    }

    pub fn validate(&self) -> ManagerResult<()> {
        for (name, values) in &self.different_kwargs {
            if self.same_kwargs.contains_key(name) {
                return Err(ManagerError::InvalidSubmission(format!(
                    "argument '{}' is given both as same and different",
                    name
                )));
            }
            if self.mode == KwargsMode::PerTask && values.len() != self.number_of_tasks {
                return Err(ManagerError::InvalidSubmission(format!(
                    "argument '{}' has {} values for {} tasks",
                    name,
                    values.len(),
                    self.number_of_tasks
                )));
            }
        }
        Ok(())
    }
}
