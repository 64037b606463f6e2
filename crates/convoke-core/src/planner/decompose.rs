//! Request decomposition: prompt assembly, planner call, plan validation.
//!
//! Decomposition never fails the request. Any planner or parse error is
//! logged and degraded to the single-task fallback plan that routes the
//! whole input to the default expert.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::expert::ExpertRegistry;
use crate::plan::parser::{fallback_plan, parse_plan, preferred_default_expert};
use crate::plan::{TaskPlan, TokenUsage};

use super::{Message, Planner};

/// Build the planning conversation for one user request.
///
/// Pure function (no I/O) so prompt content is unit-testable.
pub fn build_decompose_messages(
    user_input: &str,
    experts: &[(String, String)],
) -> Vec<Message> {
    let mut roster = String::new();
    for (name, description) in experts {
        roster.push_str("- ");
        roster.push_str(name);
        if !description.is_empty() {
            roster.push_str(": ");
            roster.push_str(description);
        }
        roster.push('\n');
    }

    let system = format!(
        "You are a task planner for a team of expert workers. Decompose the \
         user request into a dependency graph of subtasks and reply with a \
         single JSON document, no prose.\n\n\
         Available experts:\n{roster}\n\
         Reply format:\n\
         {{\n\
           \"analysis\": \"one-sentence rationale\",\n\
           \"tasks\": [\n\
             {{\"id\": \"t1\", \"agent\": \"<expert name>\", \"input\": \"<subtask input>\",\n\
              \"purpose\": \"<display string>\", \"dependencies\": []}}\n\
           ],\n\
           \"parallel\": false,\n\
           \"aggregate\": true\n\
         }}\n\n\
         Rules:\n\
         - `agent` must be one of the expert names above.\n\
         - A task may reference an upstream result in its input with \
           {{{{task_id.result}}}}; list that task in `dependencies`.\n\
         - For requests needing no expert at all, reply with \
           {{\"directResponse\": true, \"response\": \"<answer>\"}}."
    );

    vec![Message::system(system), Message::user(user_input.to_string())]
}

/// Decompose a user request into a validated [`TaskPlan`].
///
/// Returns the plan plus the token usage of the planner call. Falls back to
/// direct routing on any planner or validation error; returns an empty
/// direct-response plan only if no expert is registered at all.
pub async fn decompose(
    cancel: CancellationToken,
    planner: &Arc<dyn Planner>,
    registry: &Arc<dyn ExpertRegistry>,
    user_input: &str,
    trace_id: &str,
) -> (TaskPlan, TokenUsage) {
    let names = registry.list();
    let experts: Vec<(String, String)> = names
        .iter()
        .map(|name| (name.clone(), registry.describe(name).unwrap_or_default()))
        .collect();

    let Some(default_expert) = preferred_default_expert(&names) else {
        tracing::error!(trace_id = %trace_id, "no experts registered; nothing to route to");
        let plan = TaskPlan {
            analysis: "no experts registered".to_string(),
            direct_response: true,
            ..Default::default()
        };
        return (plan, TokenUsage::default());
    };

    let messages = build_decompose_messages(user_input, &experts);

    match planner.chat(cancel, &messages).await {
        Ok(response) => match parse_plan(&response.text, &names) {
            Ok(plan) => {
                tracing::info!(
                    trace_id = %trace_id,
                    tasks = plan.tasks.len(),
                    direct = plan.direct_response,
                    "planner produced a valid plan"
                );
                (plan, response.usage)
            }
            Err(e) => {
                tracing::warn!(
                    trace_id = %trace_id,
                    error = %e,
                    "planner output invalid; falling back to direct routing"
                );
                (fallback_plan(user_input, &default_expert), response.usage)
            }
        },
        Err(e) => {
            tracing::warn!(
                trace_id = %trace_id,
                error = %e,
                "planner call failed; falling back to direct routing"
            );
            (
                fallback_plan(user_input, &default_expert),
                TokenUsage::default(),
            )
        }
    }
}
