use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Config file name constants.
pub const CONFIG_TOML: &str = ".swarm.toml";
pub const CONFIG_JSON: &str = ".swarm.json";

/// Top-level .swarm.toml config.
///
/// Every field has a default so a missing config file means "all defaults",
/// not an error. TOML is authoritative; a legacy `.swarm.json` is accepted
/// when no TOML file exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub agents: AgentsConfig,
    pub store: StoreConfig,
    pub capabilities: CapabilitiesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            agents: AgentsConfig::default(),
            store: StoreConfig::default(),
            capabilities: CapabilitiesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub heartbeat_timeout_minutes: u64,
    pub poll_interval_seconds: u64,
    pub enable_auto_scaling: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_minutes: 10,
            poll_interval_seconds: 30,
            enable_auto_scaling: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub max_workers: usize,
    pub max_retries: u32,
    pub heartbeat_interval_seconds: u64,
    /// Shell command run for each claimed task. The task is passed as JSON
    /// on stdin. Empty means the built-in no-op executor.
    pub worker_command: Option<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_retries: 3,
            heartbeat_interval_seconds: 60,
            worker_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base backoff between publish attempts; doubles per attempt.
    pub backoff_base_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Capability pool handed to auto-spawned workers.
    pub available: Vec<String>,
}

/// Find the config file path, preferring .swarm.toml over .swarm.json.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

impl Config {
    /// Load config from a path, dispatching on extension.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))
        }
    }

    /// Load config from a project root, falling back to defaults when no
    /// config file exists.
    pub fn load_or_default(root: &Path) -> anyhow::Result<Self> {
        match find_config(root) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(
            i64::try_from(self.coordinator.heartbeat_timeout_minutes).unwrap_or(10),
        )
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.coordinator.poll_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.agents.heartbeat_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(config.coordinator.heartbeat_timeout_minutes, 10);
        assert_eq!(config.coordinator.poll_interval_seconds, 30);
        assert_eq!(config.agents.max_workers, 8);
        assert_eq!(config.agents.max_retries, 3);
    }

    #[test]
    fn toml_preferred_over_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_TOML),
            "[agents]\nmax_workers = 3\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CONFIG_JSON),
            r#"{"agents": {"max_workers": 5}}"#,
        )
        .unwrap();

        let path = find_config(dir.path()).unwrap();
        assert!(path.ends_with(CONFIG_TOML));
        let config = Config::load(&path).unwrap();
        assert_eq!(config.agents.max_workers, 3);
    }

    #[test]
    fn json_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_JSON),
            r#"{"coordinator": {"heartbeat_timeout_minutes": 2}}"#,
        )
        .unwrap();
        let path = find_config(dir.path()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.coordinator.heartbeat_timeout_minutes, 2);
        // Unspecified sections keep their defaults.
        assert_eq!(config.agents.max_retries, 3);
    }
}
