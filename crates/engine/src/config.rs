//! Engine configuration, loadable from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::EventBus;
use crate::EngineError;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_while_iterations")]
    pub max_while_iterations: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            max_depth: default_max_depth(),
            max_while_iterations: default_max_while_iterations(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_node_timeout_secs() -> u64 {
    30
}

fn default_max_depth() -> usize {
    64
}

fn default_max_while_iterations() -> usize {
    100
}

pub(crate) fn default_event_capacity() -> usize {
    256
}

fn default_tick_secs() -> u64 {
    60
}

fn default_log_filter() -> String {
    "info".into()
}

impl EngineConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        if config.scheduler.tick_secs == 0 {
            return Err(EngineError::Config("scheduler.tick_secs must be positive".into()));
        }
        Ok(config)
    }
}

impl ExecutorSettings {
    /// A run-event bus buffering `event_capacity` events per subscriber.
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(self.event_capacity)
    }
}

// ---------------------------------------------------------------------------
// Runtime view
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on a single delegate call.
    pub node_timeout: Duration,
    /// Maximum nesting of node activations (and subflows) within one run.
    pub max_depth: usize,
    /// Iteration cap for while-loops that don't set `maxIterations`.
    pub max_while_iterations: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorSettings::default().into()
    }
}

impl From<ExecutorSettings> for ExecutorConfig {
    fn from(settings: ExecutorSettings) -> Self {
        Self {
            node_timeout: Duration::from_secs(settings.node_timeout_secs),
            max_depth: settings.max_depth,
            max_while_iterations: settings.max_while_iterations,
        }
    }
}
