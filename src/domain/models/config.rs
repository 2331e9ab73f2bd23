//! Engine configuration model.
//!
//! Consumed by the figment loader in `infrastructure::config`; every field
//! has a programmatic default so partial YAML / env input merges cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Count of match workers. Execute workers are `max(1, max_workers / 2)`.
    pub max_workers: usize,
    /// Capacity of the bounded event channel.
    pub event_buffer_size: usize,
    /// Deadline applied to each execution task, in seconds.
    pub execution_timeout_secs: u64,
    /// How long `stop` waits for in-flight executions, in seconds.
    pub drain_timeout_secs: u64,
    /// When true, matched rules enqueue a task; when false, matches execute
    /// inline on the match worker.
    pub enable_async_execution: bool,
    /// Run the external event filter before enqueueing.
    pub enable_rule_filtering: bool,
    /// Toggles the periodic metrics collector.
    pub enable_metrics: bool,
    /// Engine-level retry envelope for failed tasks (distinct from
    /// per-action retry).
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    /// Ingress deny set: event types dropped at submit.
    pub excluded_event_types: Vec<String>,
    /// Ingress allow set: when non-empty, only these event types pass.
    pub included_event_types: Vec<String>,
    /// Organization allow set: when non-empty, only these organizations pass.
    pub organizations: Vec<String>,
    /// Environment tag stamped into execution contexts.
    pub environment: String,
    /// Fixed UTC offset used by time-window condition predicates.
    pub timezone_offset_minutes: i32,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            event_buffer_size: 1000,
            execution_timeout_secs: 300,
            drain_timeout_secs: 30,
            enable_async_execution: true,
            enable_rule_filtering: false,
            enable_metrics: true,
            max_retries: 3,
            retry_backoff_factor: 2.0,
            excluded_event_types: Vec::new(),
            included_event_types: Vec::new(),
            organizations: Vec::new(),
            environment: "production".to_string(),
            timezone_offset_minutes: 0,
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Execute-pool size derived from the match-pool size.
    pub fn execute_workers(&self) -> usize {
        (self.max_workers / 2).max(1)
    }

    /// Capacity of the bounded task channel.
    pub fn task_buffer_size(&self) -> usize {
        self.max_workers * 2
    }
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "hookflow.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Outbound platform API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            requests_per_second: 10,
            burst_size: 20,
            timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
