//! Handoff: re-routing a failing task to an alternate expert.
//!
//! When a task fails, the handler scans the error text for capability
//! triggers (or consumes the worker's explicit missing-capability list),
//! asks the capability map for an alternate provider, and reconstructs the
//! task against it. Chains are bounded by depth and wall-clock time.
//!
//! The fallback messages returned on failure are user-facing. They are
//! chosen from a fixed localized template set and must never embed the
//! worker's error text or the user's input.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::capability::CapabilityMap;
use crate::event::{EventDispatcher, EventKind};
use crate::expert::ExpertRegistry;
use crate::plan::Task;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a handoff could not be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffFailReason {
    /// No registered expert covers any of the missing capabilities.
    NoMatchingExpert,
    /// The capability map names an expert that is no longer registered.
    TargetUnavailable,
    /// The error text yields no capability signal; the failure is an
    /// execution problem, not a capability gap.
    TargetExecution,
    /// The handoff chain reached the depth cap.
    MaxDepthExceeded,
    /// The handoff chain exceeded its wall-clock budget.
    Timeout,
    /// The handoff context does not match the failing task.
    ContextLost,
}

impl HandoffFailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMatchingExpert => "no_matching_expert",
            Self::TargetUnavailable => "target_unavailable",
            Self::TargetExecution => "target_execution",
            Self::MaxDepthExceeded => "max_depth_exceeded",
            Self::Timeout => "timeout",
            Self::ContextLost => "context_lost",
        }
    }
}

/// Per-chain bookkeeping. Created at the first failure of a task and
/// carried through re-executions; depth increases monotonically along the
/// chain.
#[derive(Debug, Clone)]
pub struct HandoffContext {
    /// Number of handoffs already performed in this chain.
    pub depth: u32,
    /// When the chain started.
    pub started_at: Instant,
    /// Id of the task that originated the chain.
    pub task_id: String,
}

impl HandoffContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            depth: 0,
            started_at: Instant::now(),
            task_id: task_id.into(),
        }
    }

    /// Wall-clock time since the chain started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Outcome of one handoff attempt.
#[derive(Debug, Clone)]
pub struct HandoffResult {
    /// Whether an alternate expert was selected.
    pub success: bool,
    /// The selected expert, when successful.
    pub new_agent: Option<String>,
    /// Chain depth after this attempt.
    pub depth: u32,
    /// Why the handoff failed, when it did.
    pub fail_reason: Option<HandoffFailReason>,
    /// User-facing message for a failed handoff; empty on success.
    pub fallback_message: String,
}

impl HandoffResult {
    fn failed(reason: HandoffFailReason, depth: u32, language: &str) -> Self {
        Self {
            success: false,
            new_agent: None,
            depth,
            fail_reason: Some(reason),
            fallback_message: fallback_message(reason, language),
        }
    }
}

// ---------------------------------------------------------------------------
// Localized fallback templates
// ---------------------------------------------------------------------------

/// Fixed, localized user-facing text for a failed handoff.
///
/// Unknown languages fall back to zh, the engine default.
pub fn fallback_message(reason: HandoffFailReason, language: &str) -> String {
    let text = match (reason, language) {
        (HandoffFailReason::NoMatchingExpert, "en") => {
            "No expert currently covers this request. Please rephrase or try again later."
        }
        (HandoffFailReason::NoMatchingExpert, _) => "当前没有合适的专家可以处理该请求，请换个说法或稍后再试。",
        (HandoffFailReason::TargetUnavailable, "en") => {
            "The expert for this request is temporarily unavailable. Please try again later."
        }
        (HandoffFailReason::TargetUnavailable, _) => "相关专家暂时不可用，请稍后再试。",
        (HandoffFailReason::TargetExecution, "en") => {
            "The request could not be completed. Please try again later."
        }
        (HandoffFailReason::TargetExecution, _) => "请求处理失败，请稍后再试。",
        (HandoffFailReason::MaxDepthExceeded, "en") => {
            "The request was relayed between experts too many times and has been stopped."
        }
        (HandoffFailReason::MaxDepthExceeded, _) => "请求在专家之间转接次数过多，已停止处理。",
        (HandoffFailReason::Timeout, "en") => {
            "Finding a suitable expert took too long. Please try again later."
        }
        (HandoffFailReason::Timeout, _) => "为该请求寻找合适专家超时，请稍后再试。",
        (HandoffFailReason::ContextLost, "en") => {
            "The request context was lost during handoff. Please try again."
        }
        (HandoffFailReason::ContextLost, _) => "转接过程中丢失了请求上下文，请重试。",
    };
    text.to_string()
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Selects an alternate expert for a failing task.
pub struct HandoffHandler {
    capabilities: Arc<CapabilityMap>,
    registry: Arc<dyn ExpertRegistry>,
    max_depth: u32,
    timeout: Duration,
    language: String,
}

impl HandoffHandler {
    pub fn new(
        capabilities: Arc<CapabilityMap>,
        registry: Arc<dyn ExpertRegistry>,
        max_depth: u32,
        timeout: Duration,
        language: impl Into<String>,
    ) -> Self {
        Self {
            capabilities,
            registry,
            max_depth,
            timeout,
            language: language.into(),
        }
    }

    /// Failure-driven handoff: derive missing capabilities from the error
    /// text, then select an alternate.
    pub fn handle_failure(
        &self,
        task: &Task,
        error_text: &str,
        ctx: &HandoffContext,
        events: &EventDispatcher,
    ) -> HandoffResult {
        if let Some(guard) = self.check_guards(task, ctx, events) {
            return guard;
        }

        let missing = self.capabilities.identify_capabilities(error_text);
        if missing.is_empty() {
            tracing::debug!(
                task_id = %task.id,
                "no capability triggers in error text; not a capability gap"
            );
            return self.fail(task, ctx, HandoffFailReason::TargetExecution, events);
        }

        self.select_alternative(task, &missing, ctx, events)
    }

    /// Handoff from an explicit missing-capability report
    /// ([`crate::error::CannotComplete`]); no error-text scanning.
    pub fn handle_cannot_complete(
        &self,
        task: &Task,
        missing_capabilities: &[String],
        ctx: &HandoffContext,
        events: &EventDispatcher,
    ) -> HandoffResult {
        if let Some(guard) = self.check_guards(task, ctx, events) {
            return guard;
        }
        if missing_capabilities.is_empty() {
            return self.fail(task, ctx, HandoffFailReason::TargetExecution, events);
        }
        self.select_alternative(task, missing_capabilities, ctx, events)
    }

    /// Chain guards: context identity, then timeout, then depth.
    fn check_guards(
        &self,
        task: &Task,
        ctx: &HandoffContext,
        events: &EventDispatcher,
    ) -> Option<HandoffResult> {
        if ctx.task_id != task.id {
            return Some(self.fail(task, ctx, HandoffFailReason::ContextLost, events));
        }
        if ctx.elapsed() > self.timeout {
            return Some(self.fail(task, ctx, HandoffFailReason::Timeout, events));
        }
        if ctx.depth >= self.max_depth {
            return Some(self.fail(task, ctx, HandoffFailReason::MaxDepthExceeded, events));
        }
        None
    }

    fn select_alternative(
        &self,
        task: &Task,
        missing: &[String],
        ctx: &HandoffContext,
        events: &EventDispatcher,
    ) -> HandoffResult {
        let current_agent = task.agent();
        let registered = self.registry.list();
        let mut saw_stale_target = false;

        for capability in missing {
            for candidate in self.capabilities.find_alternatives(capability, &current_agent) {
                if !registered.iter().any(|name| name == &candidate.name) {
                    // The map is rebuilt on registry changes, but a race is
                    // possible; skip stale entries rather than dispatching
                    // into the void.
                    saw_stale_target = true;
                    continue;
                }

                let depth = ctx.depth + 1;
                events.emit_kind(
                    EventKind::HandoffStart,
                    &json!({
                        "task_id": task.id,
                        "from": current_agent,
                        "to": candidate.name,
                        "capability": capability,
                        "depth": depth,
                    })
                    .to_string(),
                );
                tracing::info!(
                    task_id = %task.id,
                    from = %current_agent,
                    to = %candidate.name,
                    capability = %capability,
                    depth = depth,
                    "handing task off to alternate expert"
                );
                events.emit_kind(
                    EventKind::HandoffEnd,
                    &json!({
                        "task_id": task.id,
                        "to": candidate.name,
                        "depth": depth,
                    })
                    .to_string(),
                );

                return HandoffResult {
                    success: true,
                    new_agent: Some(candidate.name),
                    depth,
                    fail_reason: None,
                    fallback_message: String::new(),
                };
            }
        }

        let reason = if saw_stale_target {
            HandoffFailReason::TargetUnavailable
        } else {
            HandoffFailReason::NoMatchingExpert
        };
        self.fail(task, ctx, reason, events)
    }

    fn fail(
        &self,
        task: &Task,
        ctx: &HandoffContext,
        reason: HandoffFailReason,
        events: &EventDispatcher,
    ) -> HandoffResult {
        events.emit_kind(
            EventKind::HandoffFail,
            &json!({
                "task_id": task.id,
                "reason": reason.as_str(),
                "depth": ctx.depth,
            })
            .to_string(),
        );
        tracing::warn!(
            task_id = %task.id,
            reason = reason.as_str(),
            depth = ctx.depth,
            "handoff failed"
        );
        HandoffResult::failed(reason, ctx.depth, &self.language)
    }
}
