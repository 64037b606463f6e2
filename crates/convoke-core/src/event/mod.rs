//! Event taxonomy and the ordered event dispatcher.
//!
//! Workers and the engine both emit `(type, payload)` string pairs. The
//! engine's own emissions use the typed [`EventKind`]; worker-originated
//! event types pass through verbatim, so the dispatcher API stays stringly.

pub mod dispatcher;

use std::fmt;
use std::sync::Arc;

pub use dispatcher::EventDispatcher;

/// Callback signature for streamed events: `(event_type, payload)`.
///
/// Payloads are strings, typically JSON-encoded structures. Callbacks must
/// not call back into the orchestrator; doing so risks deadlock against the
/// dispatcher's single consumer.
pub type EventFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Event types emitted by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DecomposeStart,
    DecomposeEnd,
    Plan,
    TaskStart,
    TaskEnd,
    ToolUse,
    ToolResult,
    Content,
    Answer,
    Aggregation,
    AggregationFallback,
    HandoffStart,
    HandoffEnd,
    HandoffFail,
    Error,
}

impl EventKind {
    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DecomposeStart => "decompose_start",
            Self::DecomposeEnd => "decompose_end",
            Self::Plan => "plan",
            Self::TaskStart => "task_start",
            Self::TaskEnd => "task_end",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Content => "content",
            Self::Answer => "answer",
            Self::Aggregation => "aggregation",
            Self::AggregationFallback => "aggregation_fallback",
            Self::HandoffStart => "handoff_start",
            Self::HandoffEnd => "handoff_end",
            Self::HandoffFail => "handoff_fail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event type carries answer text the executor should collect
/// into the task result.
pub fn is_result_bearing(event_type: &str) -> bool {
    matches!(
        event_type,
        "content" | "text" | "response" | "answer" | "aggregation"
    )
}
