//! Result aggregation: merge multiple task outputs into one response.
//!
//! With two or more non-empty completed results, the planner is asked to
//! synthesize a single answer. Planner failure downgrades to plain
//! concatenation -- aggregation must never lose results.

use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::event::{EventDispatcher, EventKind};
use crate::plan::{TaskPlan, TaskStatus, TokenUsage};
use crate::planner::{Message, Planner};

/// Separator used when joining results without planner synthesis.
pub const CONCAT_SEPARATOR: &str = "\n\n---\n\n";

/// Outcome of aggregation.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    /// The merged (or single) response text.
    pub text: String,
    /// Whether `text` merges multiple task results.
    pub is_aggregated: bool,
    /// Token usage of the aggregation call, zero on the fallback path.
    pub usage: TokenUsage,
}

/// Labeled results of every completed task with non-empty output, in plan
/// order.
pub fn collect_results(plan: &TaskPlan) -> Vec<(String, String)> {
    plan.tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Completed)
        .map(|t| (t.agent(), t.result()))
        .filter(|(_, result)| !result.trim().is_empty())
        .collect()
}

/// Build the synthesis conversation for the planner.
fn build_aggregate_messages(
    analysis: &str,
    results: &[(String, String)],
    language: &str,
) -> Vec<Message> {
    let language_hint = match language {
        "en" => "Answer in English.",
        _ => "请用中文回答。",
    };

    let mut sections = String::new();
    for (agent, result) in results {
        sections.push_str(&format!("### {agent}\n{result}\n\n"));
    }

    let system = format!(
        "You are the response synthesizer for a team of expert workers. \
         Merge the labeled partial results below into one coherent answer \
         for the user. Do not mention the workers or the merging process. \
         {language_hint}"
    );
    let user = format!("Task analysis: {analysis}\n\nPartial results:\n\n{sections}");

    vec![Message::system(system), Message::user(user)]
}

/// Merge the plan's completed results into a final response.
///
/// Fewer than two non-empty results short-circuit: one result is returned
/// as-is, zero results is an error the caller reports. Otherwise the
/// planner synthesizes the response; if it fails, an
/// `aggregation_fallback` event fires and the results are concatenated.
pub async fn aggregate_results(
    cancel: CancellationToken,
    planner: &Arc<dyn Planner>,
    plan: &TaskPlan,
    events: &EventDispatcher,
    language: &str,
) -> Result<AggregateOutcome> {
    let results = collect_results(plan);

    match results.len() {
        0 => bail!("no task produced a result to aggregate"),
        1 => {
            return Ok(AggregateOutcome {
                text: results.into_iter().next().expect("len checked").1,
                is_aggregated: false,
                usage: TokenUsage::default(),
            });
        }
        _ => {}
    }

    let messages = build_aggregate_messages(&plan.analysis, &results, language);

    match planner.chat(cancel, &messages).await {
        Ok(response) if !response.text.trim().is_empty() => {
            events.emit_kind(
                EventKind::Aggregation,
                &json!({"merged": results.len()}).to_string(),
            );
            tracing::info!(
                trace_id = %events.trace_id(),
                merged = results.len(),
                "aggregated task results via planner"
            );
            Ok(AggregateOutcome {
                text: response.text,
                is_aggregated: true,
                usage: response.usage,
            })
        }
        outcome => {
            match outcome {
                Err(e) => tracing::warn!(
                    trace_id = %events.trace_id(),
                    error = %e,
                    "aggregation call failed; concatenating results"
                ),
                Ok(_) => tracing::warn!(
                    trace_id = %events.trace_id(),
                    "aggregation call returned empty text; concatenating results"
                ),
            }
            events.emit_kind(
                EventKind::AggregationFallback,
                &json!({"merged": results.len()}).to_string(),
            );
            let text = results
                .iter()
                .map(|(_, result)| result.as_str())
                .collect::<Vec<_>>()
                .join(CONCAT_SEPARATOR);
            Ok(AggregateOutcome {
                text,
                is_aggregated: true,
                usage: TokenUsage::default(),
            })
        }
    }
}
