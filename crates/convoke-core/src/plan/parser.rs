//! Planner-output parser with validation.
//!
//! Parses the planner's JSON (optionally wrapped in Markdown code fences)
//! into a [`TaskPlan`] and validates:
//! - The task list is non-empty.
//! - Task ids are unique (missing ids are assigned `t1, t2, ...` by position).
//! - Every `agent` is a registered expert name.
//! - Every dependency references a task id in the same plan.
//!
//! Cycles are NOT rejected here: plan validity errors cause a fallback to
//! direct routing, while an unschedulable graph is a structural error the
//! scheduler reports at run time.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use super::{Task, TaskPlan};

/// Errors that can occur during plan parsing and validation.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("planner output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("duplicate task id: {0:?}")]
    DuplicateTaskId(String),

    #[error("task {task:?} targets unknown expert {agent:?}")]
    UnknownExpert { task: String, agent: String },

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// The planner's JSON document, as loosely produced by an LLM.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanWire {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    tasks: Vec<TaskWire>,
    #[serde(default)]
    parallel: bool,
    #[serde(default = "default_true")]
    aggregate: bool,
    #[serde(default)]
    direct_response: bool,
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    #[serde(default)]
    id: String,
    agent: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Strip surrounding Markdown code fences (```` ``` ```` or ```` ```json ````)
/// from planner output.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse and validate planner output against the registered expert names.
///
/// Returns a validated [`TaskPlan`] with every task pending, or a
/// descriptive error the caller turns into a fallback plan.
pub fn parse_plan(raw: &str, valid_experts: &[String]) -> Result<TaskPlan, PlanParseError> {
    let body = strip_code_fences(raw);
    let wire: PlanWire = serde_json::from_str(body)?;

    // A direct-response plan may legitimately carry no tasks.
    if wire.direct_response {
        return Ok(TaskPlan {
            analysis: wire.analysis,
            tasks: Vec::new(),
            parallel: false,
            aggregate: false,
            direct_response: true,
            response: wire.response,
        });
    }

    if wire.tasks.is_empty() {
        return Err(PlanParseError::NoTasks);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(wire.tasks.len());

    for (index, task_wire) in wire.tasks.iter().enumerate() {
        let id = if task_wire.id.trim().is_empty() {
            format!("t{}", index + 1)
        } else {
            task_wire.id.trim().to_string()
        };

        if !seen.insert(id.clone()) {
            return Err(PlanParseError::DuplicateTaskId(id));
        }

        if !valid_experts.iter().any(|e| e == &task_wire.agent) {
            return Err(PlanParseError::UnknownExpert {
                task: id,
                agent: task_wire.agent.clone(),
            });
        }

        tasks.push(Arc::new(Task::new(
            id,
            task_wire.agent.clone(),
            task_wire.input.clone(),
            task_wire.purpose.clone(),
            task_wire.dependencies.clone(),
        )));
    }

    // Dependency references must resolve within the plan.
    for task in &tasks {
        for dep in &task.dependencies {
            if !seen.contains(dep) {
                return Err(PlanParseError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(TaskPlan {
        analysis: wire.analysis,
        tasks,
        parallel: wire.parallel,
        aggregate: wire.aggregate,
        direct_response: false,
        response: wire.response,
    })
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Pick the fallback expert for direct routing: the first of `memo`,
/// `schedule`, or whichever expert is configured first.
pub fn preferred_default_expert(valid_experts: &[String]) -> Option<String> {
    for preferred in ["memo", "schedule"] {
        if valid_experts.iter().any(|e| e == preferred) {
            return Some(preferred.to_string());
        }
    }
    valid_experts.first().cloned()
}

/// Build the single-task fallback plan that routes the entire user input to
/// the preferred default expert. Used whenever planner output cannot be
/// parsed or validated.
pub fn fallback_plan(user_input: &str, expert: &str) -> TaskPlan {
    TaskPlan {
        analysis: "direct routing".to_string(),
        tasks: vec![Arc::new(Task::new(
            "t1",
            expert,
            user_input,
            "route the request to the default expert",
            vec![],
        ))],
        parallel: false,
        aggregate: false,
        direct_response: false,
        response: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TaskStatus;

    fn experts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_valid_plan() {
        let raw = r#"{
            "analysis": "two steps",
            "tasks": [
                {"id": "t1", "agent": "memo", "input": "task 1", "purpose": "first"},
                {"id": "t2", "agent": "memo", "input": "task 2 {{t1.result}}", "dependencies": ["t1"]}
            ],
            "parallel": false,
            "aggregate": true
        }"#;
        let plan = parse_plan(raw, &experts(&["memo"])).expect("should parse");
        assert_eq!(plan.analysis, "two steps");
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.aggregate);
        assert!(!plan.direct_response);
        for task in &plan.tasks {
            assert_eq!(task.status(), TaskStatus::Pending);
            assert!(task.result().is_empty());
            assert!(task.error().is_empty());
        }
        assert_eq!(plan.tasks[1].dependencies, vec!["t1".to_string()]);
    }

    #[test]
    fn parse_accepts_markdown_fences() {
        for raw in [
            "```json\n{\"tasks\": [{\"agent\": \"memo\", \"input\": \"x\"}]}\n```",
            "```\n{\"tasks\": [{\"agent\": \"memo\", \"input\": \"x\"}]}\n```",
            "  {\"tasks\": [{\"agent\": \"memo\", \"input\": \"x\"}]}  ",
        ] {
            let plan = parse_plan(raw, &experts(&["memo"]))
                .unwrap_or_else(|e| panic!("should parse {raw:?}: {e}"));
            assert_eq!(plan.tasks.len(), 1);
        }
    }

    #[test]
    fn missing_ids_are_assigned_by_position() {
        let raw = r#"{"tasks": [
            {"agent": "memo", "input": "a"},
            {"agent": "memo", "input": "b"}
        ]}"#;
        let plan = parse_plan(raw, &experts(&["memo"])).unwrap();
        assert_eq!(plan.tasks[0].id, "t1");
        assert_eq!(plan.tasks[1].id, "t2");
    }

    #[test]
    fn aggregate_defaults_to_true() {
        let raw = r#"{"tasks": [{"agent": "memo", "input": "a"}]}"#;
        let plan = parse_plan(raw, &experts(&["memo"])).unwrap();
        assert!(plan.aggregate);
        assert!(!plan.parallel);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_plan("not json {{{", &experts(&["memo"])).unwrap_err();
        assert!(matches!(err, PlanParseError::Json(_)));
    }

    #[test]
    fn rejects_empty_task_list() {
        let err = parse_plan(r#"{"analysis": "nothing", "tasks": []}"#, &experts(&["memo"]))
            .unwrap_err();
        assert!(matches!(err, PlanParseError::NoTasks));
    }

    #[test]
    fn rejects_duplicate_task_ids() {
        let raw = r#"{"tasks": [
            {"id": "t1", "agent": "memo", "input": "a"},
            {"id": "t1", "agent": "memo", "input": "b"}
        ]}"#;
        let err = parse_plan(raw, &experts(&["memo"])).unwrap_err();
        assert!(matches!(err, PlanParseError::DuplicateTaskId(ref id) if id == "t1"));
    }

    #[test]
    fn rejects_unknown_expert() {
        let raw = r#"{"tasks": [{"agent": "ghost", "input": "a"}]}"#;
        let err = parse_plan(raw, &experts(&["memo"])).unwrap_err();
        assert!(
            matches!(err, PlanParseError::UnknownExpert { ref agent, .. } if agent == "ghost"),
            "expected UnknownExpert, got: {err}"
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let raw = r#"{"tasks": [
            {"id": "t1", "agent": "memo", "input": "a", "dependencies": ["t9"]}
        ]}"#;
        let err = parse_plan(raw, &experts(&["memo"])).unwrap_err();
        assert!(matches!(
            err,
            PlanParseError::UnknownDependency { ref dependency, .. } if dependency == "t9"
        ));
    }

    #[test]
    fn accepts_cyclic_dependencies() {
        // Cycles are a structural error for the scheduler, not a parse error;
        // rejecting them here would silently fall back to direct routing.
        let raw = r#"{"tasks": [
            {"id": "t1", "agent": "memo", "input": "a", "dependencies": ["t2"]},
            {"id": "t2", "agent": "memo", "input": "b", "dependencies": ["t1"]}
        ]}"#;
        let plan = parse_plan(raw, &experts(&["memo"])).expect("cycle should parse");
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn direct_response_plan_needs_no_tasks() {
        let raw = r#"{"analysis": "small talk", "directResponse": true, "response": "hello!"}"#;
        let plan = parse_plan(raw, &experts(&["memo"])).unwrap();
        assert!(plan.direct_response);
        assert_eq!(plan.response, "hello!");
        assert!(plan.tasks.is_empty());
        assert!(!plan.aggregate);
    }

    #[test]
    fn preferred_default_expert_order() {
        assert_eq!(
            preferred_default_expert(&experts(&["schedule", "memo"])),
            Some("memo".to_string())
        );
        assert_eq!(
            preferred_default_expert(&experts(&["schedule", "translate"])),
            Some("schedule".to_string())
        );
        assert_eq!(
            preferred_default_expert(&experts(&["translate", "search"])),
            Some("translate".to_string())
        );
        assert_eq!(preferred_default_expert(&[]), None);
    }

    #[test]
    fn fallback_plan_routes_everything_to_one_expert() {
        let plan = fallback_plan("note: call mom", "memo");
        assert_eq!(plan.analysis, "direct routing");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].id, "t1");
        assert_eq!(plan.tasks[0].agent(), "memo");
        assert_eq!(plan.tasks[0].input(), "note: call mom");
        assert!(plan.tasks[0].dependencies.is_empty());
        assert!(!plan.parallel);
        assert!(!plan.aggregate);
    }
}
