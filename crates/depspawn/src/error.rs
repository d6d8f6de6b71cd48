//! Error types for the spawn engine

use crate::descriptor::ObjectId;
use crate::task::TaskId;
use std::fmt;
use thiserror::Error;

/// Errors raised synchronously by `spawn` and `wait_for`
///
/// A spawn that fails with one of these never creates a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// Two arguments of the same call overlap on one object and at least one writes
    #[error("argument aliasing on object {object}: overlapping arguments with write access")]
    AliasedArgument {
        /// Object passed more than once
        object: ObjectId,
    },

    /// Sub-block does not fit the array it was taken from
    #[error("invalid region on object {object}: {reason}")]
    InvalidRegion {
        /// Array the region refers to
        object: ObjectId,
        /// What is wrong with the region
        reason: String,
    },

    /// A subtask asked for an access its own task or an ancestor holds a lock on
    ///
    /// The ancestor keeps the lock until its body returns, and the body cannot
    /// complete while it waits for the subtask. Pass the object with
    /// `claim_read`/`claim_write` to delegate it instead.
    #[error("object {object} is held by enclosing task {ancestor}; delegate it with a claim")]
    HeldByAncestor {
        /// Object the subtask asked for
        object: ObjectId,
        /// Task holding the conflicting lock
        ancestor: TaskId,
    },

    /// The runtime is shutting down
    #[error("runtime is shut down")]
    Shutdown,
}

/// Result type for spawn operations
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Failure of a task body, captured on the worker that ran it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Task that failed
    pub task: TaskId,
    /// Error message or panic payload
    pub message: String,
    /// Whether the body panicked rather than returning an error
    pub panicked: bool,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.panicked { "panicked" } else { "failed" };
        write!(f, "task {} {}: {}", self.task, kind, self.message)
    }
}

impl std::error::Error for TaskFailure {}

/// Errors reported by the blocking operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// One or more tasks failed since the previous wait
    #[error("{} task(s) failed; first: {}", .0.len(), first_failure(.0))]
    TaskFailed(Vec<TaskFailure>),

    /// A global barrier was requested from inside a task body
    #[error("wait() called from inside task {0}; use wait_for_subtasks()")]
    InsideTask(TaskId),
}

fn first_failure(failures: &[TaskFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl WaitError {
    /// Failures carried by this error, if any
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            WaitError::TaskFailed(failures) => failures,
            WaitError::InsideTask(_) => &[],
        }
    }
}

/// Result type for blocking operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Runtime configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Zero worker threads requested
    #[error("invalid thread count: {0}")]
    InvalidThreadCount(usize),

    /// Environment variable could not be parsed
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// Worker pool could not be started
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
