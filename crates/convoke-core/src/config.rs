//! Configuration for the orchestrator.

use std::time::Duration;

use thiserror::Error;

/// Tunables recognized by the orchestration engine.
///
/// Every field has a working default via [`Default`]; hosts typically start
/// from `OrchestratorConfig::default()` and override selectively.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on concurrently executing worker tasks. Must be at least 1.
    pub max_parallel_tasks: usize,
    /// Whether to invoke the aggregator when multiple results exist.
    pub enable_aggregation: bool,
    /// Whether the executor consults the handoff handler on failure.
    pub enable_handoff: bool,
    /// Transient-error retry budget per task.
    pub max_retries: u32,
    /// Initial retry backoff; doubled between attempts.
    pub retry_backoff: Duration,
    /// Depth cap on handoff chains.
    pub max_handoff_depth: u32,
    /// Absolute wall-clock cap on a handoff chain.
    pub handoff_timeout: Duration,
    /// Output-language hint passed to the aggregator ("zh" or "en").
    pub default_language: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 3,
            enable_aggregation: true,
            enable_handoff: true,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            max_handoff_depth: 3,
            handoff_timeout: Duration::from_secs(30),
            default_language: "zh".to_string(),
        }
    }
}

/// Errors from validating an [`OrchestratorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_parallel_tasks must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("unsupported default_language {0:?} (expected \"zh\" or \"en\")")]
    UnsupportedLanguage(String),
}

impl OrchestratorConfig {
    /// Validate the configuration.
    ///
    /// The engine also clamps `max_parallel_tasks` defensively at use sites,
    /// so hosts that skip validation degrade to serial execution rather than
    /// panicking.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_tasks == 0 {
            return Err(ConfigError::InvalidParallelism(0));
        }
        if self.default_language != "zh" && self.default_language != "en" {
            return Err(ConfigError::UnsupportedLanguage(
                self.default_language.clone(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallel_tasks, 3);
        assert!(config.enable_aggregation);
        assert!(config.enable_handoff);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.max_handoff_depth, 3);
        assert_eq!(config.handoff_timeout, Duration::from_secs(30));
        assert_eq!(config.default_language, "zh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = OrchestratorConfig {
            max_parallel_tasks: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParallelism(0))
        ));
    }

    #[test]
    fn unknown_language_is_rejected() {
        let config = OrchestratorConfig {
            default_language: "fr".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedLanguage(_))
        ));
    }
}
