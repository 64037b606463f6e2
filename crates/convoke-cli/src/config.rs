//! Configuration file management for convoke.
//!
//! Provides a TOML-based config file at `~/.config/convoke/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use convoke_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlannerSection {
    /// OpenAI-compatible chat-completions endpoint base URL.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            model: "glm-4".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_parallel_tasks: usize,
    pub enable_aggregation: bool,
    pub enable_handoff: bool,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_handoff_depth: u32,
    pub handoff_timeout_secs: u64,
    pub default_language: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            max_parallel_tasks: defaults.max_parallel_tasks,
            enable_aggregation: defaults.enable_aggregation,
            enable_handoff: defaults.enable_handoff,
            max_retries: defaults.max_retries,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
            max_handoff_depth: defaults.max_handoff_depth,
            handoff_timeout_secs: defaults.handoff_timeout.as_secs(),
            default_language: defaults.default_language,
        }
    }
}

impl OrchestratorSection {
    /// Convert the file section into the engine configuration.
    pub fn to_engine_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_parallel_tasks: self.max_parallel_tasks,
            enable_aggregation: self.enable_aggregation,
            enable_handoff: self.enable_handoff,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_handoff_depth: self.max_handoff_depth,
            handoff_timeout: Duration::from_secs(self.handoff_timeout_secs),
            default_language: self.default_language.clone(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the convoke config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/convoke` or `~/.config/convoke`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("convoke");
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("convoke")
}

/// Return the path to the convoke config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ConvokeConfig {
    pub planner_base_url: String,
    pub planner_model: String,
    pub planner_api_key: Option<String>,
    pub engine: OrchestratorConfig,
}

impl ConvokeConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - Config path: `cli_config` > `CONVOKE_CONFIG` env > default path.
    /// - Planner URL/model: `CONVOKE_PLANNER_URL` / `CONVOKE_PLANNER_MODEL`
    ///   env > config file > built-in default.
    /// - API key: `CONVOKE_API_KEY` env only (never written to disk).
    pub fn resolve(cli_config: Option<&Path>) -> Result<Self> {
        let path = match cli_config {
            Some(p) => p.to_path_buf(),
            None => std::env::var("CONVOKE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_path()),
        };
        let file = load_config(&path).unwrap_or_default();

        let planner_base_url =
            std::env::var("CONVOKE_PLANNER_URL").unwrap_or_else(|_| file.planner.base_url.clone());
        let planner_model =
            std::env::var("CONVOKE_PLANNER_MODEL").unwrap_or_else(|_| file.planner.model.clone());
        let planner_api_key = std::env::var("CONVOKE_API_KEY").ok();

        Ok(Self {
            planner_base_url,
            planner_model,
            planner_api_key,
            engine: file.orchestrator.to_engine_config(),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("convoke").join("config.toml");

        let original = ConfigFile {
            planner: PlannerSection {
                base_url: "http://localhost:8000/v1".to_string(),
                model: "test-model".to_string(),
            },
            orchestrator: OrchestratorSection {
                max_parallel_tasks: 5,
                ..Default::default()
            },
        };

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.planner.base_url, original.planner.base_url);
        assert_eq!(loaded.planner.model, original.planner.model);
        assert_eq!(loaded.orchestrator.max_parallel_tasks, 5);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[planner]\nbase_url = \"http://x\"\nmodel = \"m\"\n").unwrap();

        let loaded = load_config(&path).unwrap();
        let engine = loaded.orchestrator.to_engine_config();
        assert_eq!(engine.max_parallel_tasks, 3);
        assert_eq!(engine.retry_backoff, Duration::from_secs(1));
        assert_eq!(engine.default_language, "zh");
    }

    #[test]
    fn engine_config_converts_durations() {
        let section = OrchestratorSection {
            retry_backoff_ms: 250,
            handoff_timeout_secs: 7,
            ..Default::default()
        };
        let engine = section.to_engine_config();
        assert_eq!(engine.retry_backoff, Duration::from_millis(250));
        assert_eq!(engine.handoff_timeout, Duration::from_secs(7));
    }
}
