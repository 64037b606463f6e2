//! DAG scheduler: drives concurrent task execution honoring dependencies.
//!
//! A single scheduling loop owns the ready queue, the in-degree map, and
//! task status accounting. Worker futures are spawned per ready task; each
//! acquires a semaphore permit (bounding parallelism), resolves its input
//! through the context injector, runs the executor, and reports back over a
//! channel. On failure the scheduler cascade-skips every transitive
//! dependent still pending. When nothing is running, nothing is ready, and
//! non-terminal tasks remain, the plan is declared deadlocked.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::context::resolve_input;
use crate::error::{Cancelled, SchedulerError};
use crate::event::{EventDispatcher, EventKind};
use crate::executor::execute_task;
use crate::expert::ExpertRegistry;
use crate::handoff::HandoffHandler;
use crate::plan::{Task, TaskPlan};

/// Pause between scheduling passes when nothing is immediately actionable.
const IDLE_TICK: Duration = Duration::from_millis(10);

/// Grace period for in-flight workers after cancellation.
const CANCEL_DRAIN: Duration = Duration::from_secs(10);

/// Message sent from a worker future back to the scheduling loop.
struct TaskDone {
    id: String,
    failed: bool,
}

/// Run a plan to completion.
///
/// Returns `Ok(())` when every task reached a terminal status (including
/// failures and skips; per-task errors are recorded on the tasks, not
/// returned). Returns an error only for structural problems: an unknown
/// dependency id, a dependency cycle/deadlock, or cancellation.
pub async fn run_plan(
    cancel: CancellationToken,
    plan: &TaskPlan,
    registry: Arc<dyn ExpertRegistry>,
    events: Arc<EventDispatcher>,
    handoff: Option<Arc<HandoffHandler>>,
    config: &OrchestratorConfig,
) -> Result<(), SchedulerError> {
    let total = plan.tasks.len();
    if total == 0 {
        return Ok(());
    }

    // Resolve the graph once: tasks by id, in-degree, reverse adjacency.
    let tasks_by_id: Arc<HashMap<String, Arc<Task>>> = Arc::new(
        plan.tasks
            .iter()
            .map(|t| (t.id.clone(), Arc::clone(t)))
            .collect(),
    );

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
    for task in &plan.tasks {
        in_degree.insert(task.id.clone(), 0);
        downstream.insert(task.id.clone(), Vec::new());
    }
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !tasks_by_id.contains_key(dep) {
                return Err(SchedulerError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
            *in_degree.get_mut(&task.id).expect("seeded above") += 1;
            downstream.get_mut(dep).expect("seeded above").push(task.id.clone());
        }
    }

    let mut ready: VecDeque<String> = plan
        .tasks
        .iter()
        .filter(|t| in_degree[&t.id] == 0)
        .map(|t| t.id.clone())
        .collect();

    let semaphore = Arc::new(Semaphore::new(config.max_parallel_tasks.max(1)));
    let (tx, mut rx) = mpsc::channel::<TaskDone>(total);
    let mut in_flight: usize = 0;
    let mut terminal: usize = 0;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(
                trace_id = %events.trace_id(),
                in_flight = in_flight,
                "scheduler cancelled; draining in-flight tasks"
            );
            let deadline = tokio::time::Instant::now() + CANCEL_DRAIN;
            while in_flight > 0 {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(_done)) => in_flight -= 1,
                    _ => break,
                }
            }
            if in_flight > 0 {
                tracing::warn!(
                    trace_id = %events.trace_id(),
                    remaining = in_flight,
                    "drain deadline expired with workers still in flight"
                );
            }
            // Everything that never reached a terminal status carries the
            // cancellation reason; completed tasks are untouched.
            for task in &plan.tasks {
                task.fail("execution cancelled".to_string());
            }
            return Err(SchedulerError::Cancelled(Cancelled));
        }

        // Drain completed results (non-blocking).
        while let Ok(done) = rx.try_recv() {
            in_flight -= 1;
            terminal += settle(
                &done,
                &tasks_by_id,
                &downstream,
                &mut in_degree,
                &mut ready,
                &events,
            );
        }

        // Dispatch every ready task as its own worker future.
        while let Some(id) = ready.pop_front() {
            let task = Arc::clone(&tasks_by_id[&id]);
            let worker_cancel = cancel.clone();
            let worker_registry = Arc::clone(&registry);
            let worker_events = Arc::clone(&events);
            let worker_handoff = handoff.clone();
            let worker_config = config.clone();
            let worker_semaphore = Arc::clone(&semaphore);
            let worker_tasks = Arc::clone(&tasks_by_id);
            let worker_tx = tx.clone();

            in_flight += 1;

            tokio::spawn(async move {
                let Ok(_permit) = worker_semaphore.acquire_owned().await else {
                    let _ = worker_tx
                        .send(TaskDone {
                            id: task.id.clone(),
                            failed: true,
                        })
                        .await;
                    return;
                };

                let failed = match resolve_input(&task.input(), &worker_tasks) {
                    Ok(resolved) => {
                        task.set_input(resolved);
                        execute_task(
                            worker_cancel,
                            &task,
                            &worker_registry,
                            &worker_events,
                            worker_handoff.as_deref(),
                            &worker_config,
                        )
                        .await
                        .is_err()
                    }
                    Err(e) => {
                        let message = format!("context injection failed: {e}");
                        task.fail(message.clone());
                        worker_events.emit_kind(
                            EventKind::Error,
                            &json!({"task_id": task.id, "message": message}).to_string(),
                        );
                        worker_events.emit_kind(
                            EventKind::TaskEnd,
                            &json!({
                                "task_id": task.id,
                                "status": "failed",
                                "error": message,
                            })
                            .to_string(),
                        );
                        tracing::warn!(
                            trace_id = %worker_events.trace_id(),
                            task_id = %task.id,
                            error = %e,
                            "context injection failed"
                        );
                        true
                    }
                };

                let _ = worker_tx
                    .send(TaskDone {
                        id: task.id.clone(),
                        failed,
                    })
                    .await;
            });
        }

        if terminal >= total {
            return Ok(());
        }

        if in_flight == 0 && ready.is_empty() {
            // Nothing running, nothing ready, non-terminal tasks remain:
            // the remaining tasks form a cycle (or an unresolvable knot).
            tracing::error!(
                trace_id = %events.trace_id(),
                completed = terminal,
                total = total,
                "dependency cycle or deadlock detected"
            );
            return Err(SchedulerError::CycleOrDeadlock {
                completed: terminal,
                total,
            });
        }

        tokio::select! {
            done = rx.recv() => {
                if let Some(done) = done {
                    in_flight -= 1;
                    terminal += settle(
                        &done,
                        &tasks_by_id,
                        &downstream,
                        &mut in_degree,
                        &mut ready,
                        &events,
                    );
                }
            }
            _ = cancel.cancelled() => {
                // Handled at the top of the next iteration.
            }
            _ = tokio::time::sleep(IDLE_TICK) => {}
        }
    }
}

/// Account for one finished task: on success unlock its dependents, on
/// failure cascade-skip every transitive dependent still pending.
///
/// Returns how many tasks newly reached a terminal status (the finished
/// task itself plus any skipped dependents).
fn settle(
    done: &TaskDone,
    tasks_by_id: &HashMap<String, Arc<Task>>,
    downstream: &HashMap<String, Vec<String>>,
    in_degree: &mut HashMap<String, usize>,
    ready: &mut VecDeque<String>,
    events: &EventDispatcher,
) -> usize {
    let mut newly_terminal = 1;

    if !done.failed {
        for child in &downstream[&done.id] {
            let degree = in_degree.get_mut(child).expect("all tasks seeded");
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(child.clone());
            }
        }
        return newly_terminal;
    }

    // Cascade skip: BFS through the reverse adjacency. `Task::skip` only
    // fires on pending tasks, which also keeps the search from revisiting.
    let mut queue: VecDeque<&str> = downstream[&done.id].iter().map(String::as_str).collect();
    while let Some(child_id) = queue.pop_front() {
        let child = &tasks_by_id[child_id];
        let skipped = child.skip(format!(
            "skipped because upstream task {} did not complete",
            done.id
        ));
        if skipped {
            newly_terminal += 1;
            events.emit_kind(
                EventKind::TaskEnd,
                &json!({
                    "task_id": child.id,
                    "status": "skipped",
                    "error": child.error(),
                })
                .to_string(),
            );
            tracing::info!(
                trace_id = %events.trace_id(),
                task_id = %child.id,
                upstream = %done.id,
                "task skipped after upstream failure"
            );
            queue.extend(downstream[child_id].iter().map(String::as_str));
        }
    }

    newly_terminal
}
