// Engine configuration (§10.3). A TOML file at `~/.provisionctl/engine.toml`
// (overridable via `PROVISIONCTL_CONFIG_PATH`); a missing file is not an
// error; every field has a default so the engine boots with zero config.

use crate::{log_debug, log_warn};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overrides the plan state store root; defaults to
    /// `~/.provisionctl/state/plans`.
    pub state_root: Option<PathBuf>,
    /// Worker budget cap for the DAG scheduler; the effective budget is
    /// `min(worker_budget, CPU count)`.
    pub worker_budget: usize,
    /// Overrides the default blocking-step timeout, in milliseconds.
    pub default_timeout_ms: Option<u64>,
    /// Overrides the default `build` step timeout, in milliseconds.
    pub build_timeout_ms: Option<u64>,
    /// When true, a choice with exactly one `ready` option marked
    /// `recommended` is applied without prompting (§10.6 Open Question
    /// decision: defaults to false, the safer posture for a provisioning
    /// tool that can run `sudo`-gated steps).
    pub auto_apply_ready_recommended: bool,
    /// Additional directories scanned for user-supplied recipe YAML,
    /// layered on top of the built-in registry in declared order.
    pub extra_recipe_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            state_root: None,
            worker_budget: 4,
            default_timeout_ms: None,
            build_timeout_ms: None,
            auto_apply_ready_recommended: false,
            extra_recipe_paths: Vec::new(),
        }
    }
}

const ENV_OVERRIDE: &str = "PROVISIONCTL_CONFIG_PATH";

pub fn default_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".provisionctl").join("engine.toml")
}

fn resolve_config_path() -> PathBuf {
    std::env::var(ENV_OVERRIDE).map(PathBuf::from).unwrap_or_else(|_| default_config_path())
}

impl EngineConfig {
    /// Loads from the env-overridable default path. A missing file yields
    /// `EngineConfig::default()`, not an error; a present-but-malformed file
    /// is a load failure, surfaced to the CLI boundary via `anyhow`.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&resolve_config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log_debug!("[Config] no config file at {:?}, using defaults", path);
            return Ok(EngineConfig::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        log_debug!("[Config] loaded engine config from {}", path.display().to_string().green());
        if config.worker_budget == 0 {
            log_warn!("[Config] worker_budget=0 in {:?}; effective budget will be 1", path);
        }
        Ok(config)
    }

    pub fn effective_worker_budget(&self) -> usize {
        let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        std::cmp::min(self.worker_budget.max(1), cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(!config.auto_apply_ready_recommended);
        assert_eq!(config.worker_budget, 4);
    }

    #[test]
    fn parses_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "worker_budget = 2\nauto_apply_ready_recommended = true\n").unwrap();
        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.worker_budget, 2);
        assert!(config.auto_apply_ready_recommended);
        assert!(config.extra_recipe_paths.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(EngineConfig::load_from(&path).is_err());
    }
}
