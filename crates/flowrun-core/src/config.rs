use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlowError, Result};

/// Top-level flowrun configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub routine: Option<RoutineConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on node invocations in one walk.
    #[serde(default = "default_max_node_executions")]
    pub max_node_executions: usize,
    /// Resolve a missing runner version to the newest older version of the
    /// same type instead of failing.
    #[serde(default)]
    pub allow_version_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_executions: default_max_node_executions(),
            allow_version_fallback: false,
        }
    }
}

fn default_max_node_executions() -> usize { 1000 }

/// Wait-state persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. In-memory when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl StoreConfig {
    /// Resolved database path (expand ~).
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Directory holding `*.json` flow definitions.
    #[serde(default = "default_flows_dir")]
    pub dir: String,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            dir: default_flows_dir(),
        }
    }
}

impl FlowsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_home(&self.dir)
    }
}

fn default_flows_dir() -> String { "flows".to_string() }

/// Out-of-band expiry of wait records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval(),
        }
    }
}

fn default_reaper_enabled() -> bool { true }
fn default_reaper_interval() -> u64 { 30 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutineConfig {
    #[serde(default)]
    pub jobs: Vec<RoutineJobConfig>,
}

/// A cron-driven `routine` trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineJobConfig {
    pub name: String,
    pub schedule: String,
    pub flow_code: String,
    #[serde(default)]
    pub flow_version: Option<String>,
    pub organization_code: String,
    pub conversation_id: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "info".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.engine.max_node_executions == 0 {
            return Err(FlowError::Config(
                "engine.max_node_executions must be at least 1".into(),
            ));
        }
        if self.reaper.enabled && self.reaper.interval_secs == 0 {
            return Err(FlowError::Config(
                "reaper.interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
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
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
