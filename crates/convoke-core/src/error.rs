//! Shared error types for the orchestration core.
//!
//! Component-specific errors live next to their components
//! ([`crate::plan::parser::PlanParseError`], [`crate::context::ContextError`]);
//! this module holds the errors that cross component boundaries: the
//! cancellation sentinel and the scheduler's structural errors.

use thiserror::Error;

/// Sentinel marking cooperative cancellation.
///
/// Cancellation must be recognized by identity (a downcast through the error
/// chain), never by message match: worker error messages may incidentally
/// contain retryable-looking substrings, and a cancelled call must never be
/// retried or handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution cancelled")]
pub struct Cancelled;

/// Return `true` if `err` carries the [`Cancelled`] sentinel anywhere in its
/// chain.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|c| c.downcast_ref::<Cancelled>().is_some())
}

/// Typed error a worker can return to request a handoff with an explicit list
/// of capabilities it is missing, instead of relying on error-text scanning.
#[derive(Debug, Clone, Error)]
#[error("expert cannot complete the task; missing capabilities: {}", missing_capabilities.join(", "))]
pub struct CannotComplete {
    /// Normalized capability tags the reporting expert lacks.
    pub missing_capabilities: Vec<String>,
}

/// Structural errors returned by the DAG scheduler.
///
/// These are the only errors (besides cancellation) that bubble out of
/// [`crate::orchestrator::Orchestrator::process`]; per-task failures are
/// recorded on the tasks and in the execution result instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A task declares a dependency on an id that is not in the plan.
    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    /// No task is ready, none is in flight, and non-terminal tasks remain.
    #[error(
        "dependency cycle or deadlock detected: {completed} of {total} tasks reached a terminal status"
    )]
    CycleOrDeadlock { completed: usize, total: usize },

    /// The execution context was cancelled.
    #[error("execution cancelled")]
    Cancelled(#[from] Cancelled),
}
