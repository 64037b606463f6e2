//! In-process expert registry -- a named collection of [`Expert`] workers.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::EventFn;

use super::trait_def::{Expert, ExpertRegistry};
use super::ExpertInfo;

/// A collection of registered [`Expert`] implementations, keyed by name.
///
/// # Example
///
/// ```ignore
/// let mut registry = StaticExpertRegistry::new();
/// registry.register(MemoExpert::new());
/// let orchestrator = Orchestrator::new(Arc::new(registry), planner, config);
/// ```
#[derive(Default)]
pub struct StaticExpertRegistry {
    experts: HashMap<String, Box<dyn Expert>>,
}

impl StaticExpertRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expert.
    ///
    /// The expert is stored under the name in its [`ExpertInfo`]. If an
    /// expert with the same name is already registered, it is replaced and
    /// the old one is returned.
    pub fn register(&mut self, expert: impl Expert + 'static) -> Option<Box<dyn Expert>> {
        let name = expert.info().name;
        self.experts.insert(name, Box::new(expert))
    }

    /// Look up an expert by name.
    pub fn get(&self, name: &str) -> Option<&dyn Expert> {
        self.experts.get(name).map(|b| b.as_ref())
    }

    /// Return the number of registered experts.
    pub fn len(&self) -> usize {
        self.experts.len()
    }

    /// Return `true` if no experts are registered.
    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}

impl std::fmt::Debug for StaticExpertRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticExpertRegistry")
            .field("experts", &self.experts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ExpertRegistry for StaticExpertRegistry {
    fn list(&self) -> Vec<String> {
        self.experts.keys().cloned().collect()
    }

    fn describe(&self, name: &str) -> Option<String> {
        self.experts.get(name).map(|e| e.info().description)
    }

    fn get_config(&self, name: &str) -> Option<ExpertInfo> {
        self.experts.get(name).map(|e| e.info())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        name: &str,
        input: &str,
        on_event: EventFn,
    ) -> Result<()> {
        let Some(expert) = self.get(name) else {
            bail!("expert {name:?} is not registered");
        };
        expert.execute(cancel, input, on_event).await
    }
}
