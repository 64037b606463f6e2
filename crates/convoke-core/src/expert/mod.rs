//! Expert worker interface for the orchestration engine.
//!
//! This module defines the [`ExpertRegistry`] trait the core consumes, the
//! [`Expert`] trait concrete workers implement, the [`ExpertInfo`] descriptor,
//! and the in-process [`StaticExpertRegistry`].
//!
//! # Architecture
//!
//! ```text
//! Orchestrator / Scheduler / Executor
//!     |
//!     v
//! dyn ExpertRegistry
//!     |   list() / describe(name) / get_config(name)
//!     |   execute(cancel, name, input, on_event)
//!     v
//! StaticExpertRegistry --get("memo")--> &dyn Expert
//!     |
//!     |   on_event("content", chunk)   (streamed, many times per call)
//!     v
//! EventDispatcher --> caller callback
//! ```

pub mod registry;
pub mod trait_def;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use registry::StaticExpertRegistry;
pub use trait_def::{Expert, ExpertRegistry};

/// Descriptor for a registered expert worker.
///
/// Capability tags are normalized (trimmed, lower-cased) when the descriptor
/// is indexed by the capability map; triggers map a capability tag to the
/// phrases that imply it when found in free-form text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpertInfo {
    /// Unique registry name (e.g. "memo").
    pub name: String,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: String,
    /// One-paragraph description shown to the planner.
    #[serde(default)]
    pub description: String,
    /// Capability tags this expert provides.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Capability tag -> trigger phrases that imply it.
    #[serde(default)]
    pub triggers: HashMap<String, Vec<String>>,
}

impl ExpertInfo {
    /// Convenience constructor for an expert with no capabilities.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
