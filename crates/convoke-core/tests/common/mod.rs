//! Shared test doubles: scripted experts, a scripted planner, an event
//! recorder, and plan-building helpers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use convoke_core::event::EventFn;
use convoke_core::plan::{Task, TaskPlan};
use convoke_core::planner::{ChatResponse, Message, Planner};
use convoke_core::{Expert, ExpertInfo, TokenUsage};

// ===========================================================================
// Concurrency gauge
// ===========================================================================

/// Tracks the peak number of concurrent `enter`/`exit` pairs.
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ===========================================================================
// MockExpert -- behavior scripted as a function of (input, call index)
// ===========================================================================

type Behavior = Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>;

/// Expert double whose behavior is a closure from `(input, call_index)` to
/// either content text (emitted as a `content` event) or an error.
pub struct MockExpert {
    info: ExpertInfo,
    behavior: Behavior,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub count: Arc<AtomicUsize>,
    delay: Option<Duration>,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl MockExpert {
    pub fn new(
        name: &str,
        behavior: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            info: ExpertInfo::named(name),
            behavior: Box::new(behavior),
            calls: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicUsize::new(0)),
            delay: None,
            gauge: None,
        }
    }

    /// Expert that emits fixed content for every call.
    pub fn echoing(name: &str, content: &str) -> Self {
        let content = content.to_string();
        Self::new(name, move |_input, _n| Ok(content.clone()))
    }

    /// Expert that answers by input lookup; unknown inputs error.
    pub fn answering(name: &str, table: &[(&str, &str)]) -> Self {
        let table: HashMap<String, String> = table
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(name, move |input, _n| {
            table
                .get(input)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no scripted answer for input {input:?}"))
        })
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.info.description = description.to_string();
        self
    }

    pub fn with_capability(mut self, capability: &str, triggers: &[&str]) -> Self {
        self.info.capabilities.push(capability.to_string());
        self.info.triggers.insert(
            capability.to_string(),
            triggers.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

#[async_trait]
impl Expert for MockExpert {
    fn info(&self) -> ExpertInfo {
        self.info.clone()
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        input: &str,
        on_event: EventFn,
    ) -> Result<()> {
        let call_index = self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(input.to_string());

        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = (self.behavior)(input, call_index);
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }

        let content = outcome?;
        on_event("content", &content);
        Ok(())
    }
}

// ===========================================================================
// ScriptedPlanner -- pops one canned response per chat call
// ===========================================================================

enum PlannerStep {
    Text(String),
    TextWithUsage(String, TokenUsage),
    Error(String),
}

/// Planner double that replays a fixed sequence of responses and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlannerStep>>,
    pub requests: Mutex<Vec<Vec<Message>>>,
    pub count: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_text(self, text: &str) -> Self {
        self.steps
            .lock()
            .unwrap()
            .push_back(PlannerStep::Text(text.to_string()));
        self
    }

    pub fn then_text_with_usage(self, text: &str, usage: TokenUsage) -> Self {
        self.steps
            .lock()
            .unwrap()
            .push_back(PlannerStep::TextWithUsage(text.to_string(), usage));
        self
    }

    pub fn then_error(self, message: &str) -> Self {
        self.steps
            .lock()
            .unwrap()
            .push_back(PlannerStep::Error(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn chat(
        &self,
        _cancel: CancellationToken,
        messages: &[Message],
    ) -> Result<ChatResponse> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(PlannerStep::Text(text)) => Ok(ChatResponse {
                text,
                usage: TokenUsage::default(),
            }),
            Some(PlannerStep::TextWithUsage(text, usage)) => Ok(ChatResponse { text, usage }),
            Some(PlannerStep::Error(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("scripted planner has no response left")),
        }
    }
}

// ===========================================================================
// Event recorder
// ===========================================================================

pub type RecordedEvents = Arc<Mutex<Vec<(String, String)>>>;

/// Event callback that appends every `(type, payload)` pair to a vector.
pub fn recording_callback() -> (EventFn, RecordedEvents) {
    let events: RecordedEvents = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: EventFn = Arc::new(move |event_type: &str, payload: &str| {
        sink.lock()
            .unwrap()
            .push((event_type.to_string(), payload.to_string()));
    });
    (callback, events)
}

/// Event types in recorded order.
pub fn event_types(events: &RecordedEvents) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|(event_type, _)| event_type.clone())
        .collect()
}

// ===========================================================================
// Plan builders
// ===========================================================================

/// Build a pending task for direct scheduler tests.
pub fn task(id: &str, agent: &str, input: &str, dependencies: &[&str]) -> Arc<Task> {
    Arc::new(Task::new(
        id,
        agent,
        input,
        format!("test task {id}"),
        dependencies.iter().map(|d| d.to_string()).collect(),
    ))
}

/// Build a plan around prepared tasks.
pub fn plan(tasks: Vec<Arc<Task>>) -> TaskPlan {
    TaskPlan {
        analysis: "test plan".to_string(),
        tasks,
        parallel: true,
        aggregate: true,
        direct_response: false,
        response: String::new(),
    }
}
