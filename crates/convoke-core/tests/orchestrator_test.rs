//! End-to-end tests for the orchestrator facade: decomposition fallback,
//! direct response, aggregation, and error propagation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use convoke_core::planner::Planner;
use convoke_core::{
    ExpertRegistry, Orchestrator, OrchestratorConfig, StaticExpertRegistry, TaskStatus,
    TokenUsage,
};

use common::{MockExpert, ScriptedPlanner, event_types, recording_callback};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

fn registry_of(experts: Vec<MockExpert>) -> Arc<dyn ExpertRegistry> {
    let mut registry = StaticExpertRegistry::new();
    for expert in experts {
        registry.register(expert);
    }
    Arc::new(registry)
}

// ===========================================================================
// Decomposition and fallback
// ===========================================================================

#[tokio::test]
async fn planner_failure_falls_back_to_direct_routing() {
    let memo = MockExpert::echoing("memo", "noted");
    let calls = memo.calls.clone();

    let planner = Arc::new(ScriptedPlanner::new().then_error("llm unreachable"));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "remember to water the plants", callback)
        .await
        .expect("fallback plan still executes");

    // The whole user input routed to the default expert.
    assert_eq!(
        calls.lock().unwrap().as_slice(),
        &["remember to water the plants"]
    );
    assert_eq!(result.plan.analysis, "direct routing");
    assert_eq!(result.final_response, "noted");
    assert!(!result.is_aggregated);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn invalid_plan_json_falls_back_to_direct_routing() {
    let memo = MockExpert::echoing("memo", "ok");
    let calls = memo.calls.clone();

    let planner = Arc::new(ScriptedPlanner::new().then_text("certainly! here is my plan:"));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "do the thing", callback)
        .await
        .unwrap();

    assert_eq!(calls.lock().unwrap().as_slice(), &["do the thing"]);
    assert_eq!(result.plan.analysis, "direct routing");
}

#[tokio::test]
async fn unknown_expert_in_plan_falls_back_to_direct_routing() {
    let memo = MockExpert::echoing("memo", "ok");
    let calls = memo.calls.clone();

    let plan_json = r#"{"tasks": [{"agent": "ghost", "input": "spooky"}]}"#;
    let planner = Arc::new(ScriptedPlanner::new().then_text(plan_json));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "original input", callback)
        .await
        .unwrap();

    assert_eq!(calls.lock().unwrap().as_slice(), &["original input"]);
    assert_eq!(result.plan.tasks.len(), 1);
    assert_eq!(result.plan.tasks[0].agent(), "memo");
}

// ===========================================================================
// Direct response
// ===========================================================================

#[tokio::test]
async fn direct_response_bypasses_the_scheduler() {
    let memo = MockExpert::echoing("memo", "should not run");
    let count = memo.count.clone();

    let plan_json = r#"{"analysis": "small talk", "directResponse": true, "response": "你好！"}"#;
    let planner = Arc::new(ScriptedPlanner::new().then_text(plan_json));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "hi", callback)
        .await
        .unwrap();

    assert_eq!(result.final_response, "你好！");
    assert!(!result.is_aggregated);
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(planner.calls(), 1, "no aggregation call");

    // The caller still observes the decompose envelope, in order.
    let types = event_types(&events);
    let start = types.iter().position(|t| t == "decompose_start").unwrap();
    let plan_pos = types.iter().position(|t| t == "plan").unwrap();
    let end = types.iter().position(|t| t == "decompose_end").unwrap();
    assert!(start < plan_pos && plan_pos < end);
}

// ===========================================================================
// Aggregation
// ===========================================================================

const TWO_TASK_PLAN: &str = r#"```json
{
  "analysis": "split across experts",
  "tasks": [
    {"id": "t1", "agent": "memo", "input": "note A", "purpose": "remember"},
    {"id": "t2", "agent": "search", "input": "find B", "purpose": "look up"}
  ],
  "parallel": true,
  "aggregate": true
}
```"#;

#[tokio::test]
async fn multiple_results_are_aggregated_by_the_planner() {
    let memo = MockExpert::echoing("memo", "memo says A");
    let search = MockExpert::echoing("search", "search says B");

    let planner = Arc::new(
        ScriptedPlanner::new()
            .then_text_with_usage(
                TWO_TASK_PLAN,
                TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                    ..Default::default()
                },
            )
            .then_text_with_usage(
                "merged answer",
                TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    ..Default::default()
                },
            ),
    );
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator =
        Orchestrator::new(registry_of(vec![memo, search]), planner_dyn, fast_config());

    let (callback, events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "note A and find B", callback)
        .await
        .unwrap();

    assert_eq!(result.final_response, "merged answer");
    assert!(result.is_aggregated);
    assert!(result.errors.is_empty());
    assert_eq!(planner.calls(), 2);

    // Usage merged across decompose and aggregate calls.
    assert_eq!(result.token_usage.input_tokens, 110);
    assert_eq!(result.token_usage.output_tokens, 55);

    // The aggregation prompt carries the labeled partial results.
    let requests = planner.requests.lock().unwrap();
    let aggregate_prompt = &requests[1][1].content;
    assert!(aggregate_prompt.contains("memo says A"));
    assert!(aggregate_prompt.contains("search says B"));

    assert!(event_types(&events).contains(&"aggregation".to_string()));
}

#[tokio::test]
async fn aggregation_failure_downgrades_to_concatenation() {
    let memo = MockExpert::echoing("memo", "memo says A");
    let search = MockExpert::echoing("search", "search says B");

    let planner = Arc::new(
        ScriptedPlanner::new()
            .then_text(TWO_TASK_PLAN)
            .then_error("synthesis model overloaded"),
    );
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator =
        Orchestrator::new(registry_of(vec![memo, search]), planner_dyn, fast_config());

    let (callback, events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "both please", callback)
        .await
        .unwrap();

    assert_eq!(result.final_response, "memo says A\n\n---\n\nsearch says B");
    assert!(result.is_aggregated);
    assert!(event_types(&events).contains(&"aggregation_fallback".to_string()));
}

#[tokio::test]
async fn single_result_short_circuits_without_an_aggregation_call() {
    let memo = MockExpert::echoing("memo", "only result");

    let plan_json = r#"{"tasks": [{"agent": "memo", "input": "solo"}], "aggregate": true}"#;
    let planner = Arc::new(ScriptedPlanner::new().then_text(plan_json));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "solo", callback)
        .await
        .unwrap();

    assert_eq!(result.final_response, "only result");
    assert!(!result.is_aggregated);
    assert_eq!(planner.calls(), 1, "aggregate=true with one result skips the planner");
}

#[tokio::test]
async fn aggregation_disabled_concatenates_without_the_planner() {
    let memo = MockExpert::echoing("memo", "A");
    let search = MockExpert::echoing("search", "B");

    let planner = Arc::new(ScriptedPlanner::new().then_text(TWO_TASK_PLAN));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let config = OrchestratorConfig {
        enable_aggregation: false,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(registry_of(vec![memo, search]), planner_dyn, config);

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "both", callback)
        .await
        .unwrap();

    assert_eq!(result.final_response, "A\n\n---\n\nB");
    assert!(!result.is_aggregated);
    assert_eq!(planner.calls(), 1);
}

// ===========================================================================
// Failure shapes
// ===========================================================================

#[tokio::test]
async fn per_task_failures_do_not_fail_process() {
    let memo = MockExpert::new("memo", |input, _n| {
        if input == "will fail" {
            anyhow::bail!("hard failure")
        }
        Ok("fine".to_string())
    });

    let plan_json = r#"{"tasks": [
        {"id": "t1", "agent": "memo", "input": "will fail"},
        {"id": "t2", "agent": "memo", "input": "needs {{t1.result}}", "dependencies": ["t1"]}
    ], "aggregate": true}"#;
    let planner = Arc::new(ScriptedPlanner::new().then_text(plan_json));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let config = OrchestratorConfig {
        enable_handoff: false,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, config);

    let (callback, _events) = recording_callback();
    let result = orchestrator
        .process(CancellationToken::new(), "try it", callback)
        .await
        .expect("per-task failures are recorded, not returned");

    assert_eq!(result.plan.task("t1").unwrap().status(), TaskStatus::Failed);
    assert_eq!(result.plan.task("t2").unwrap().status(), TaskStatus::Skipped);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].starts_with("t1:"));
    assert!(result.errors[1].contains("t1"), "skip reason references the failed upstream");
    assert!(result.final_response.is_empty());
}

#[tokio::test]
async fn cyclic_plan_is_a_structural_error() {
    let memo = MockExpert::echoing("memo", "unreachable");

    let plan_json = r#"{"tasks": [
        {"id": "t1", "agent": "memo", "input": "a", "dependencies": ["t2"]},
        {"id": "t2", "agent": "memo", "input": "b", "dependencies": ["t1"]}
    ]}"#;
    let planner = Arc::new(ScriptedPlanner::new().then_text(plan_json));
    let planner_dyn: Arc<dyn Planner> = planner.clone();
    let orchestrator = Orchestrator::new(registry_of(vec![memo]), planner_dyn, fast_config());

    let (callback, _events) = recording_callback();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.process(CancellationToken::new(), "loop", callback),
    )
    .await
    .expect("cycle detection must not hang")
    .unwrap_err();

    let message = err.to_string();
    assert!(
        message.contains("cycle") || message.contains("deadlock"),
        "unexpected error: {message}"
    );
}
