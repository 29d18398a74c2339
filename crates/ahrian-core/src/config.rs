use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AhrianError, Result};

/// Top-level Ahrian configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Refinement passes the planner may perform. Forwarded unchanged.
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget: u32,
    /// Delay after each successful non-final step, in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Per-step dispatch timeout (0 = no timeout).
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Planner call timeout (0 = no timeout).
    #[serde(default = "default_planning_timeout_secs")]
    pub planning_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_budget: default_cycle_budget(),
            pacing_ms: default_pacing_ms(),
            step_timeout_secs: default_step_timeout_secs(),
            planning_timeout_secs: default_planning_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn planning_timeout(&self) -> Option<Duration> {
        (self.planning_timeout_secs > 0).then(|| Duration::from_secs(self.planning_timeout_secs))
    }
}

fn default_cycle_budget() -> u32 { 1 }
fn default_pacing_ms() -> u64 { 5000 }
fn default_step_timeout_secs() -> u64 { 300 }
fn default_planning_timeout_secs() -> u64 { 120 }

/// Conversation persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `~/` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Key namespace conversations are stored under.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            namespace: default_namespace(),
        }
    }
}

fn default_store_path() -> String { "~/.ahrian/conversations.db".to_string() }
fn default_namespace() -> String { "ahrian_conversations".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AhrianError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| AhrianError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.cycle_budget == 0 {
            return Err(AhrianError::Config(
                "engine.cycle_budget must be at least 1".into(),
            ));
        }
        if self.store.namespace.trim().is_empty() {
            return Err(AhrianError::Config("store.namespace must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve the database path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let path = &self.store.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep the reference if the variable is unset
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
