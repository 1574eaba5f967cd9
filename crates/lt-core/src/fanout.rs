//! Labelled fan-out of independent tasks on the rayon pool.
//!
//! Every task runs to completion; there is no cancellation between them.
//! Results are joined at a single barrier and failures are reported together.

use std::error::Error;
use std::fmt;

use rayon::prelude::*;

type TaskFn<'a, T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'a>;

/// A labelled unit of work.
pub struct Task<'a, T, E> {
    label: &'static str,
    run: TaskFn<'a, T, E>,
}

impl<'a, T, E> Task<'a, T, E> {
    pub fn new(label: &'static str, run: impl FnOnce() -> Result<T, E> + Send + 'a) -> Self {
        Self {
            label,
            run: Box::new(run),
        }
    }

    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl<T, E> fmt::Debug for Task<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// One failed task.
#[derive(Debug)]
pub struct TaskFailure<E> {
    pub label: &'static str,
    pub error: E,
}

/// Every failure from one fan-out.
#[derive(Debug)]
pub struct FanOutError<E> {
    /// Number of tasks that ran.
    pub total: usize,
    /// Failed tasks, in input order.
    pub failures: Vec<TaskFailure<E>>,
}

impl<E> FanOutError<E> {
    /// Labels of the failed tasks.
    pub fn failed_labels(&self) -> Vec<&'static str> {
        self.failures.iter().map(|failure| failure.label).collect()
    }
}

impl<E: fmt::Display> fmt::Display for FanOutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} tasks failed", self.failures.len(), self.total)?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", failure.label, failure.error)?;
        }
        Ok(())
    }
}

impl<E: Error + 'static> Error for FanOutError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failures
            .first()
            .map(|failure| &failure.error as &(dyn Error + 'static))
    }
}

/// Runs all tasks in parallel and waits for every one of them.
///
/// Returns the successes in input order, or every failure if any task failed.
pub fn fan_out<T: Send, E: Send>(tasks: Vec<Task<'_, T, E>>) -> Result<Vec<T>, FanOutError<E>> {
    let total = tasks.len();
    let outcomes: Vec<(&'static str, Result<T, E>)> = tasks
        .into_par_iter()
        .map(|task| (task.label, (task.run)()))
        .collect();

    let mut successes = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (label, outcome) in outcomes {
        match outcome {
            Ok(value) => successes.push(value),
            Err(error) => {
                tracing::debug!(task = label, "fan-out task failed");
                failures.push(TaskFailure { label, error });
            }
        }
    }

    if failures.is_empty() {
        Ok(successes)
    } else {
        Err(FanOutError { total, failures })
    }
}
