//! Ordered, non-blocking event delivery to the caller's callback.
//!
//! A single consumer task drains a bounded FIFO queue and invokes the
//! callback, so observers see a total order despite concurrent producers.
//! Producers never block: when the queue is full the event is dropped and a
//! warning logged. Task execution must never stall on a slow observer.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventFn, EventKind};

/// Queue capacity between producers and the consumer task.
const QUEUE_CAPACITY: usize = 100;

struct QueuedEvent {
    event_type: String,
    payload: String,
}

/// Serializes event delivery for one plan execution.
///
/// Created at the start of each `process` call with that call's trace id and
/// callback; closed deterministically after the plan finishes. Sends after
/// close are silently discarded.
pub struct EventDispatcher {
    trace_id: String,
    tx: Mutex<Option<mpsc::Sender<QueuedEvent>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    overflow_warned: AtomicBool,
}

impl EventDispatcher {
    /// Spawn the consumer task and return the dispatcher.
    pub fn spawn(trace_id: impl Into<String>, callback: EventFn) -> Self {
        let trace_id = trace_id.into();
        let (tx, mut rx) = mpsc::channel::<QueuedEvent>(QUEUE_CAPACITY);

        let consumer_trace_id = trace_id.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Contain callback panics so one bad observer cannot poison
                // the pipeline for the rest of the plan.
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    callback(&event.event_type, &event.payload)
                }));
                if result.is_err() {
                    tracing::error!(
                        trace_id = %consumer_trace_id,
                        event_type = %event.event_type,
                        "event callback panicked; event discarded"
                    );
                }
            }
        });

        Self {
            trace_id,
            tx: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
            overflow_warned: AtomicBool::new(false),
        }
    }

    /// Trace id this dispatcher was created with.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Enqueue an event without blocking.
    ///
    /// Drops the event when the queue is full (backpressure policy: drop
    /// newest over stalling an executor) or when the dispatcher is closed.
    pub fn emit(&self, event_type: &str, payload: &str) {
        let Some(tx) = self.tx.lock().unwrap().as_ref().cloned() else {
            tracing::debug!(
                trace_id = %self.trace_id,
                event_type = %event_type,
                "event after dispatcher close; discarded"
            );
            return;
        };

        let event = QueuedEvent {
            event_type: event_type.to_string(),
            payload: payload.to_string(),
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // First overflow per plan warns; later ones stay at debug to
                // avoid a log storm while the observer is stalled.
                if !self.overflow_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        trace_id = %self.trace_id,
                        event_type = %event_type,
                        "event queue full; dropping event"
                    );
                } else {
                    tracing::debug!(
                        trace_id = %self.trace_id,
                        event_type = %event_type,
                        "event queue full; dropping event"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    trace_id = %self.trace_id,
                    event_type = %event_type,
                    "event channel closed; discarded"
                );
            }
        }
    }

    /// Typed variant of [`emit`](Self::emit) for engine-originated events.
    pub fn emit_kind(&self, kind: EventKind, payload: &str) {
        self.emit(kind.as_str(), payload);
    }

    /// Close the dispatcher: signal the queue, wait for the consumer to
    /// drain and join.
    ///
    /// Idempotent. After close, further sends are silently discarded.
    pub async fn close(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);

        let consumer = self.consumer.lock().unwrap().take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                tracing::error!(trace_id = %self.trace_id, error = %e, "event consumer task failed");
            }
        }
    }
}
