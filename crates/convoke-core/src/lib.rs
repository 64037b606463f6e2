//! convoke-core: a multi-agent task orchestration engine.
//!
//! The engine accepts a free-form user request, asks an LLM planner to
//! decompose it into a dependency graph of subtasks, drives the graph
//! against a pool of pluggable expert workers with bounded parallelism,
//! streams progress events to the caller, and aggregates the partial
//! results into a single response.
//!
//! ```text
//! request --> Orchestrator --> decompose --> TaskPlan
//!                 |                             |
//!                 |                             v
//!                 |                        DAG scheduler <--+
//!                 |                             |           |
//!                 |                             v           |
//!                 |                       task executor ----+ HandoffHandler
//!                 |                             |           |       |
//!                 |                             v           |       v
//!                 |                      dyn ExpertRegistry-+  CapabilityMap
//!                 |                             |
//!                 |                             v
//!                 |                      EventDispatcher --> caller callback
//!                 v
//!             aggregate --> final response
//! ```
//!
//! Hosts implement two traits: [`ExpertRegistry`] (or register
//! [`Expert`]s on the bundled [`StaticExpertRegistry`]) and [`Planner`].
//! Everything else is wired by [`Orchestrator::process`].

pub mod aggregate;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod expert;
pub mod handoff;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod scheduler;

// Re-export the primary public API at the crate root.
pub use capability::CapabilityMap;
pub use config::OrchestratorConfig;
pub use error::{CannotComplete, Cancelled, SchedulerError};
pub use event::{EventDispatcher, EventFn, EventKind};
pub use expert::{Expert, ExpertInfo, ExpertRegistry, StaticExpertRegistry};
pub use handoff::{HandoffContext, HandoffFailReason, HandoffHandler, HandoffResult};
pub use orchestrator::Orchestrator;
pub use plan::{ExecutionResult, Task, TaskPlan, TaskSnapshot, TaskStatus, TokenUsage};
pub use planner::{ChatResponse, Message, Planner, Role};
