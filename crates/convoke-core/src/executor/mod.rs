//! Single-task execution: retry, result collection, handoff, events.
//!
//! The executor owns one task from `task_start` to `task_end`. It drives
//! the worker call, classifies failures as transient (retried with
//! exponential backoff) or not (handed off when enabled), and collects
//! answer text streamed through result-bearing events into the task result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::{CannotComplete, Cancelled, is_cancelled};
use crate::event::{EventDispatcher, EventFn, EventKind, is_result_bearing};
use crate::expert::ExpertRegistry;
use crate::handoff::{HandoffContext, HandoffHandler};
use crate::plan::Task;

// ---------------------------------------------------------------------------
// Transient-error classification
// ---------------------------------------------------------------------------

/// Substrings that mark an error message as transient. A pragmatic
/// heuristic, not an exact classifier; matched case-insensitively against
/// the full error chain.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "service unavailable",
    "too many requests",
    "rate limit",
    "429",
    "502",
    "503",
    "504",
    "i/o timeout",
    "temporary",
    "retry",
    "network unreachable",
    "no route to host",
];

/// Whether an error is worth retrying.
///
/// Cancellation is checked first, by sentinel identity: a cancelled call is
/// never transient even if its message happens to contain a retryable
/// substring. Deadline expiry counts as transient regardless of message.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if is_cancelled(err) {
        return false;
    }
    if err
        .chain()
        .any(|c| c.downcast_ref::<tokio::time::error::Elapsed>().is_some())
    {
        return true;
    }
    let message = format!("{err:#}").to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

/// Bound and trim an error for recording on a task.
fn sanitize_error(err: &anyhow::Error) -> String {
    const MAX_LEN: usize = 500;
    let message = format!("{err:#}");
    if message.len() <= MAX_LEN {
        return message;
    }
    let mut cut = MAX_LEN;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &message[..cut])
}

// ---------------------------------------------------------------------------
// Result buffer
// ---------------------------------------------------------------------------

/// Cap on collected answer text per task.
const MAX_RESULT_BYTES: usize = 10 * 1024 * 1024;

/// Accumulates result-bearing event payloads, capped at
/// [`MAX_RESULT_BYTES`]. Overflow is dropped with a single warning.
struct ResultBuffer {
    text: Mutex<String>,
    truncated: AtomicBool,
    task_id: String,
}

impl ResultBuffer {
    fn new(task_id: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(String::new()),
            truncated: AtomicBool::new(false),
            task_id: task_id.to_string(),
        })
    }

    fn append(&self, chunk: &str) {
        let mut text = self.text.lock().unwrap();
        let remaining = MAX_RESULT_BYTES.saturating_sub(text.len());
        if remaining == 0 {
            self.warn_once();
            return;
        }
        if chunk.len() <= remaining {
            text.push_str(chunk);
            return;
        }
        let mut cut = remaining;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        text.push_str(&chunk[..cut]);
        self.warn_once();
    }

    fn warn_once(&self) {
        if !self.truncated.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                task_id = %self.task_id,
                limit_bytes = MAX_RESULT_BYTES,
                "task result exceeds size cap; further output dropped"
            );
        }
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.text.lock().unwrap())
    }

    fn clear(&self) {
        self.text.lock().unwrap().clear();
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute one task against its expert, with retry and handoff.
///
/// The task must be `pending` with its input already interpolated. On
/// return the task is terminal: `completed` on success (result recorded),
/// `failed` otherwise (sanitized error recorded). The returned error, if
/// any, tells the scheduler to cascade-skip dependents.
pub async fn execute_task(
    cancel: CancellationToken,
    task: &Arc<Task>,
    registry: &Arc<dyn ExpertRegistry>,
    events: &Arc<EventDispatcher>,
    handoff: Option<&HandoffHandler>,
    config: &OrchestratorConfig,
) -> Result<()> {
    let mut chain_started: Option<Instant> = None;
    let mut depth: u32 = 0;

    // One iteration per expert in the handoff chain.
    loop {
        let agent = task.agent();
        if !task.begin_running() {
            anyhow::bail!("task {} is not pending (status {})", task.id, task.status());
        }
        events.emit_kind(
            EventKind::TaskStart,
            &json!({
                "task_id": task.id,
                "agent": agent,
                "purpose": task.purpose,
                "depth": depth,
            })
            .to_string(),
        );
        tracing::info!(
            trace_id = %events.trace_id(),
            task_id = %task.id,
            agent = %agent,
            depth = depth,
            "task started"
        );

        let outcome = run_with_retry(&cancel, task, &agent, registry, events, config).await;

        match outcome {
            Ok(result) => {
                task.complete(result);
                events.emit_kind(
                    EventKind::TaskEnd,
                    &json!({
                        "task_id": task.id,
                        "agent": agent,
                        "status": "completed",
                    })
                    .to_string(),
                );
                tracing::info!(
                    trace_id = %events.trace_id(),
                    task_id = %task.id,
                    "task completed"
                );
                return Ok(());
            }
            Err(err) if is_cancelled(&err) => {
                return fail_task(task, &agent, err, events);
            }
            Err(err) => {
                let Some(handler) = handoff else {
                    return fail_task(task, &agent, err, events);
                };

                let ctx = HandoffContext {
                    depth,
                    started_at: *chain_started.get_or_insert_with(Instant::now),
                    task_id: task.id.clone(),
                };

                let handoff_result = match err.downcast_ref::<CannotComplete>() {
                    Some(cc) => handler.handle_cannot_complete(
                        task,
                        &cc.missing_capabilities,
                        &ctx,
                        events,
                    ),
                    None => handler.handle_failure(task, &err.to_string(), &ctx, events),
                };

                if handoff_result.success {
                    let new_agent = handoff_result
                        .new_agent
                        .expect("successful handoff carries an agent");
                    task.reassign(new_agent);
                    depth = handoff_result.depth;
                    continue;
                }

                // Record the localized fallback message as the task error:
                // it is what the caller may show to the user.
                task.fail(handoff_result.fallback_message.clone());
                events.emit_kind(
                    EventKind::Error,
                    &json!({
                        "task_id": task.id,
                        "message": handoff_result.fallback_message,
                    })
                    .to_string(),
                );
                events.emit_kind(
                    EventKind::TaskEnd,
                    &json!({
                        "task_id": task.id,
                        "agent": agent,
                        "status": "failed",
                        "error": handoff_result.fallback_message,
                    })
                    .to_string(),
                );
                return Err(err);
            }
        }
    }
}

/// Mark the task failed with a sanitized error and emit closing events.
fn fail_task(
    task: &Arc<Task>,
    agent: &str,
    err: anyhow::Error,
    events: &Arc<EventDispatcher>,
) -> Result<()> {
    let sanitized = sanitize_error(&err);
    task.fail(sanitized.clone());
    events.emit_kind(
        EventKind::Error,
        &json!({"task_id": task.id, "message": sanitized}).to_string(),
    );
    events.emit_kind(
        EventKind::TaskEnd,
        &json!({
            "task_id": task.id,
            "agent": agent,
            "status": "failed",
            "error": sanitized,
        })
        .to_string(),
    );
    tracing::warn!(
        trace_id = %events.trace_id(),
        task_id = %task.id,
        error = %sanitized,
        "task failed"
    );
    Err(err)
}

/// Call the expert, retrying transient failures with exponential backoff.
/// Returns the collected result text on success.
async fn run_with_retry(
    cancel: &CancellationToken,
    task: &Arc<Task>,
    agent: &str,
    registry: &Arc<dyn ExpertRegistry>,
    events: &Arc<EventDispatcher>,
    config: &OrchestratorConfig,
) -> Result<String> {
    let buffer = ResultBuffer::new(&task.id);
    let mut backoff = config.retry_backoff;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled).context("task not executed"));
        }

        buffer.clear();
        let events_fwd = events.clone();
        let buffer_fwd = buffer.clone();
        let on_event: EventFn = Arc::new(move |event_type, payload| {
            events_fwd.emit(event_type, payload);
            if is_result_bearing(event_type) {
                buffer_fwd.append(payload);
            }
        });

        let result = registry
            .execute(cancel.clone(), agent, &task.input(), on_event)
            .await;

        match result {
            Ok(()) => return Ok(buffer.take()),
            Err(err) => {
                if !is_transient(&err) || attempt >= config.max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(
                    trace_id = %events.trace_id(),
                    task_id = %task.id,
                    agent = %agent,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient worker error; retrying after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return Err(anyhow::Error::new(Cancelled).context("cancelled during retry backoff"));
                    }
                }
                backoff *= 2;
            }
        }
    }
}
