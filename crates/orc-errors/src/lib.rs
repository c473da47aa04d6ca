//! Error taxonomy for the plan execution orchestrator.
//!
//! Three error shapes flow through the executor: a single task's
//! failure (`TaskError`), a timed-out attempt (`TimeoutError`, which
//! always unwraps to a `Cancelled` sentinel), and the aggregate
//! failure of a whole execution phase (`ExecutionError`). `OrcError` is
//! the top-level enum collaborator-facing `Result`s return.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Sentinel error at the root of every timeout's source chain, the way
/// a cancelled operation's cause is recognized regardless of how many
/// layers of context wrap it.
#[derive(Debug, Default)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl StdError for Cancelled {}

/// A single task's failure, carrying the task name and an optional
/// underlying cause.
#[derive(Debug, Error)]
#[error("task {task_name} failed: {message}")]
pub struct TaskError {
    /// Name of the task that failed.
    pub task_name: String,
    /// Human-readable failure message.
    pub message: String,
    /// Underlying cause, if the failure wraps another error.
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TaskError {
    /// Build a task error with no further cause.
    #[must_use]
    pub fn new(task_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// A task attempt that exceeded its configured deadline. Always
/// recognizable as a timeout via [`is_timeout_error`] regardless of how
/// many layers of wrapping error types sit above it, because its
/// `source()` is always a [`Cancelled`].
#[derive(Debug, Error)]
#[error("task {task_name} timed out after {duration:?} during {context}")]
pub struct TimeoutError {
    /// Name of the task that timed out.
    pub task_name: String,
    /// Configured deadline that was exceeded.
    pub duration: Duration,
    /// What the executor was doing when the deadline hit (invocation,
    /// test command, review).
    pub context: String,
}

impl TimeoutError {
    /// Build a timeout error.
    #[must_use]
    pub fn new(task_name: impl Into<String>, duration: Duration, context: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            duration,
            context: context.into(),
        }
    }
}

impl StdError for TimeoutError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        // Constructed fresh each call since `Cancelled` carries no data;
        // this keeps `TimeoutError` from needing to store the sentinel.
        Some(&CANCELLED_SENTINEL)
    }
}

static CANCELLED_SENTINEL: Cancelled = Cancelled;

/// The phase of plan execution an [`ExecutionError`] was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Whole-plan (multi-wave) execution.
    Plan,
    /// A single wave's execution.
    Wave,
    /// A single task's execution.
    Task,
    /// QC review of a task's output.
    Qc,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Plan => "plan",
            Phase::Wave => "wave",
            Phase::Task => "task",
            Phase::Qc => "qc",
        };
        write!(f, "{s}")
    }
}

/// Aggregate failure of a whole execution phase, carrying every
/// constituent task error.
#[derive(Debug, Error)]
#[error("{phase} execution failed: {failed_tasks}/{total_tasks} tasks failed")]
pub struct ExecutionError {
    /// Phase the failure occurred in.
    pub phase: Phase,
    /// Total tasks attempted in this phase.
    pub total_tasks: usize,
    /// Tasks that did not succeed.
    pub failed_tasks: usize,
    /// Per-task errors collected during the phase.
    pub task_errors: Vec<TaskError>,
}

impl ExecutionError {
    /// Build an execution error from its constituent task errors.
    #[must_use]
    pub fn new(phase: Phase, total_tasks: usize, task_errors: Vec<TaskError>) -> Self {
        Self {
            phase,
            total_tasks,
            failed_tasks: task_errors.len(),
            task_errors,
        }
    }
}

/// Top-level error returned by orchestrator collaborator boundaries.
#[derive(Debug, Error)]
pub enum OrcError {
    /// A single task failed.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// A task attempt timed out.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// A whole phase failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// A plan failed its own structural validation.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    /// A lock could not be acquired.
    #[error("lock error: {0}")]
    Lock(String),
    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl OrcError {
    /// Whether this error represents a timed-out operation, including
    /// when wrapped inside an [`ExecutionError`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, OrcError::Timeout(_))
    }
}

/// Walk an error's `source()` chain looking for a [`Cancelled`]
/// sentinel, recognizing a timeout regardless of how many layers of
/// context wrap it.
#[must_use]
pub fn is_cancelled(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if err.is::<Cancelled>() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Walk an error's `source()` chain looking for a [`TaskError`].
#[must_use]
pub fn find_task_error(error: &(dyn StdError + 'static)) -> Option<&TaskError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(task_error) = err.downcast_ref::<TaskError>() {
            return Some(task_error);
        }
        current = err.source();
    }
    None
}

/// Walk an error's `source()` chain looking for a [`TimeoutError`].
#[must_use]
pub fn find_timeout_error(error: &(dyn StdError + 'static)) -> Option<&TimeoutError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(timeout) = err.downcast_ref::<TimeoutError>() {
            return Some(timeout);
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_source_is_cancelled() {
        let err = TimeoutError::new("1.1", Duration::from_secs(30), "invocation");
        assert!(is_cancelled(&err));
    }

    #[test]
    fn task_error_without_source_is_not_cancelled() {
        let err = TaskError::new("1.1", "boom");
        assert!(!is_cancelled(&err));
    }

    #[test]
    fn task_error_is_found_through_wrapping() {
        let inner = TaskError::new("1.1", "boom");
        let wrapped = TaskError::new("1.1", "outer").with_source(inner);
        let found = find_task_error(&wrapped).expect("inner task error");
        assert_eq!(found.message, "boom");
    }

    #[test]
    fn timeout_is_found_through_execution_error_chain() {
        let timeout = TimeoutError::new("2.3", Duration::from_secs(10), "test-commands");
        let task_error = TaskError::new("2.3", "timed out").with_source(timeout);
        assert!(find_timeout_error(&task_error).is_some());
    }

    #[test]
    fn orc_error_is_timeout_variant() {
        let err = OrcError::Timeout(TimeoutError::new("1", Duration::from_secs(1), "review"));
        assert!(err.is_timeout());
        let other = OrcError::Task(TaskError::new("1", "boom"));
        assert!(!other.is_timeout());
    }
}
