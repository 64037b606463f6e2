//! Orchestrator facade: the public entry point of the engine.
//!
//! Wires decomposition, scheduling, and aggregation together for one
//! request, manages the trace id and the event dispatcher lifecycle, and
//! shapes the final [`ExecutionResult`].

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{aggregate_results, collect_results, CONCAT_SEPARATOR};
use crate::capability::CapabilityMap;
use crate::config::OrchestratorConfig;
use crate::event::{EventDispatcher, EventFn, EventKind};
use crate::expert::ExpertRegistry;
use crate::handoff::HandoffHandler;
use crate::plan::{ExecutionResult, TaskStatus};
use crate::planner::{Planner, decompose};
use crate::scheduler::run_plan;

/// Coordination engine between a request source and a pool of expert
/// workers.
///
/// One orchestrator serves many requests; each [`process`](Self::process)
/// call gets its own trace id, event dispatcher, and plan.
pub struct Orchestrator {
    registry: Arc<dyn ExpertRegistry>,
    planner: Arc<dyn Planner>,
    capabilities: Arc<CapabilityMap>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator and build the capability map from the
    /// registry's current expert configurations.
    pub fn new(
        registry: Arc<dyn ExpertRegistry>,
        planner: Arc<dyn Planner>,
        config: OrchestratorConfig,
    ) -> Self {
        let orchestrator = Self {
            registry,
            planner,
            capabilities: Arc::new(CapabilityMap::new()),
            config,
        };
        orchestrator.rebuild_capabilities();
        orchestrator
    }

    /// Rebuild the capability map. Call after the registry's expert set
    /// changes; safe during concurrent reads.
    pub fn rebuild_capabilities(&self) {
        let configs: Vec<_> = self
            .registry
            .list()
            .iter()
            .filter_map(|name| self.registry.get_config(name))
            .collect();
        self.capabilities.build_from_configs(&configs);
    }

    /// The capability map owned by this orchestrator.
    pub fn capabilities(&self) -> &Arc<CapabilityMap> {
        &self.capabilities
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Process one user request end to end.
    ///
    /// Streams progress events to `on_event` (see [`EventFn`]; callbacks
    /// must not call back into the orchestrator) and returns when the plan
    /// has run to completion. Per-task failures are recorded in the result,
    /// not returned as errors; only structural errors (dependency
    /// cycle/deadlock) and cancellation fail the call.
    pub async fn process(
        &self,
        cancel: CancellationToken,
        user_input: &str,
        on_event: EventFn,
    ) -> Result<ExecutionResult> {
        self.config
            .validate()
            .context("invalid orchestrator configuration")?;

        let trace_id = Uuid::new_v4().to_string();
        let events = Arc::new(EventDispatcher::spawn(trace_id.clone(), on_event));
        tracing::info!(trace_id = %trace_id, "processing request");

        events.emit_kind(
            EventKind::DecomposeStart,
            &json!({"trace_id": trace_id}).to_string(),
        );

        let (plan, mut token_usage) = decompose(
            cancel.clone(),
            &self.planner,
            &self.registry,
            user_input,
            &trace_id,
        )
        .await;

        events.emit_kind(
            EventKind::Plan,
            &json!({
                "analysis": plan.analysis,
                "tasks": plan.snapshot(),
                "parallel": plan.parallel,
                "aggregate": plan.aggregate,
                "direct_response": plan.direct_response,
            })
            .to_string(),
        );
        events.emit_kind(
            EventKind::DecomposeEnd,
            &json!({"trace_id": trace_id, "task_count": plan.tasks.len()}).to_string(),
        );

        // Planner bypass: the pre-filled response is the whole answer.
        if plan.direct_response {
            let response = plan.response.clone();
            events.close().await;
            return Ok(ExecutionResult {
                plan,
                final_response: response,
                is_aggregated: false,
                token_usage,
                errors: Vec::new(),
            });
        }

        let handoff = if self.config.enable_handoff {
            Some(Arc::new(HandoffHandler::new(
                Arc::clone(&self.capabilities),
                Arc::clone(&self.registry),
                self.config.max_handoff_depth,
                self.config.handoff_timeout,
                self.config.default_language.clone(),
            )))
        } else {
            None
        };

        let scheduled = run_plan(
            cancel.clone(),
            &plan,
            Arc::clone(&self.registry),
            Arc::clone(&events),
            handoff,
            &self.config,
        )
        .await;

        if let Err(e) = scheduled {
            events.close().await;
            return Err(e.into());
        }

        // Per-task errors, in plan order.
        let errors: Vec<String> = plan
            .tasks
            .iter()
            .filter(|t| matches!(t.status(), TaskStatus::Failed | TaskStatus::Skipped))
            .map(|t| format!("{}: {}", t.id, t.error()))
            .collect();

        let (final_response, is_aggregated) =
            if self.config.enable_aggregation && plan.aggregate {
                match aggregate_results(
                    cancel,
                    &self.planner,
                    &plan,
                    &events,
                    &self.config.default_language,
                )
                .await
                {
                    Ok(outcome) => {
                        token_usage.merge(&outcome.usage);
                        (outcome.text, outcome.is_aggregated)
                    }
                    Err(e) => {
                        tracing::warn!(trace_id = %trace_id, error = %e, "no aggregatable results");
                        (String::new(), false)
                    }
                }
            } else {
                // Aggregation disabled (or declined by the plan): return the
                // results verbatim, joined when there are several.
                let results = collect_results(&plan);
                let text = results
                    .iter()
                    .map(|(_, result)| result.as_str())
                    .collect::<Vec<_>>()
                    .join(CONCAT_SEPARATOR);
                (text, false)
            };

        events.close().await;

        tracing::info!(
            trace_id = %trace_id,
            tasks = plan.tasks.len(),
            errors = errors.len(),
            aggregated = is_aggregated,
            "request processed"
        );

        Ok(ExecutionResult {
            plan,
            final_response,
            is_aggregated,
            token_usage,
            errors,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("experts", &self.registry.list())
            .field("config", &self.config)
            .finish()
    }
}
