//! Plan data model: tasks, task plans, execution results.
//!
//! A [`Task`]'s identity fields are immutable; its mutable fields (agent,
//! input, status, result, error) sit behind a per-task mutex so the
//! scheduler, executor, and dispatcher can read concurrently while the
//! owning executor writes. Terminal statuses are final: transition methods
//! refuse to move a task out of `completed`, `failed`, or `skipped`.

pub mod parser;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of a task.
///
/// Transitions: `pending -> running -> {completed, failed}` or
/// `pending -> skipped`. `completed`, `failed`, and `skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Mutable portion of a task, guarded by the task's mutex.
#[derive(Debug, Clone)]
struct TaskState {
    agent: String,
    input: String,
    status: TaskStatus,
    result: String,
    error: String,
}

/// A unit of work within a plan.
///
/// Created by the plan parser; mutated only by the scheduler and the
/// executor that owns it. `result` is empty unless the task completed;
/// `error` is empty unless it failed or was skipped.
#[derive(Debug)]
pub struct Task {
    /// Unique id within the plan (e.g. "t1").
    pub id: String,
    /// Free-form display string explaining why this task exists.
    pub purpose: String,
    /// Ids of tasks that must complete before this one starts.
    pub dependencies: Vec<String>,
    state: Mutex<TaskState>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        input: impl Into<String>,
        purpose: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            purpose: purpose.into(),
            dependencies,
            state: Mutex::new(TaskState {
                agent: agent.into(),
                input: input.into(),
                status: TaskStatus::Pending,
                result: String::new(),
                error: String::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.state.lock().unwrap()
    }

    /// Current target expert name.
    pub fn agent(&self) -> String {
        self.state().agent.clone()
    }

    /// Current (possibly already interpolated) input.
    pub fn input(&self) -> String {
        self.state().input.clone()
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    /// Result text; empty unless completed.
    pub fn result(&self) -> String {
        self.state().result.clone()
    }

    /// Error text; empty unless failed or skipped.
    pub fn error(&self) -> String {
        self.state().error.clone()
    }

    /// Replace the input with its interpolated form.
    ///
    /// Called by the scheduler before dispatch, while the task is pending.
    pub fn set_input(&self, input: String) {
        self.state().input = input;
    }

    /// Transition `pending -> running`. Returns `false` if the task was not
    /// pending.
    pub fn begin_running(&self) -> bool {
        let mut state = self.state();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Running;
        true
    }

    /// Transition `running -> completed` and record the result. Returns
    /// `false` if the task was not running.
    pub fn complete(&self, result: String) -> bool {
        let mut state = self.state();
        if state.status != TaskStatus::Running {
            return false;
        }
        state.status = TaskStatus::Completed;
        state.result = result;
        true
    }

    /// Transition `running -> failed` (or `pending -> failed` for tasks
    /// that never started, e.g. on cancellation or injection failure) and
    /// record the error. Returns `false` if the task was already terminal.
    pub fn fail(&self, error: String) -> bool {
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        state.status = TaskStatus::Failed;
        state.error = error;
        true
    }

    /// Transition `pending -> skipped` with an explanatory error. Returns
    /// `false` if the task was not pending.
    pub fn skip(&self, error: String) -> bool {
        let mut state = self.state();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Skipped;
        state.error = error;
        true
    }

    /// Re-target the task at a new expert and reset `running -> pending`
    /// for a handoff re-execution. Returns `false` if the task was not
    /// running.
    pub fn reassign(&self, agent: String) -> bool {
        let mut state = self.state();
        if state.status != TaskStatus::Running {
            return false;
        }
        state.agent = agent;
        state.status = TaskStatus::Pending;
        state.result.clear();
        state.error.clear();
        true
    }

    /// Immutable snapshot of the full task for display or serialization.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        TaskSnapshot {
            id: self.id.clone(),
            agent: state.agent.clone(),
            input: state.input.clone(),
            purpose: self.purpose.clone(),
            dependencies: self.dependencies.clone(),
            status: state.status,
            result: state.result.clone(),
            error: state.error.clone(),
        }
    }
}

/// Point-in-time copy of a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub agent: String,
    pub input: String,
    pub purpose: String,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub result: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A validated plan: an ordered collection of tasks plus planner metadata.
///
/// Cloning a plan is cheap; tasks are shared behind `Arc` so the scheduler,
/// executors, and the returned [`ExecutionResult`] all observe the same
/// task state.
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    /// Planner rationale, for display.
    pub analysis: String,
    /// Tasks in planner order.
    pub tasks: Vec<Arc<Task>>,
    /// Advisory parallelism hint; the dependency graph is authoritative.
    pub parallel: bool,
    /// Whether the aggregator should run when multiple results exist.
    pub aggregate: bool,
    /// Planner bypass: when `true`, `response` is returned as-is and the
    /// scheduler is not invoked.
    pub direct_response: bool,
    /// Pre-filled response for the direct-response bypass.
    pub response: String,
}

impl TaskPlan {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Snapshot every task for display or serialization.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot()).collect()
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Token counters reported by planner calls and passed through from workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another usage record into this one.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Outcome of one `process` invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The executed plan, with tasks in their final states.
    pub plan: TaskPlan,
    /// The response returned to the caller.
    pub final_response: String,
    /// Whether `final_response` merges multiple task results.
    pub is_aggregated: bool,
    /// Token counters accumulated across planner calls.
    pub token_usage: TokenUsage,
    /// Error strings collected from failed and skipped tasks, in plan order.
    pub errors: Vec<String>,
}
