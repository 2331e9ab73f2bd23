//! Rule and action domain models.
//!
//! A rule pairs a condition tree with an ordered action list, scoped to an
//! organization. Actions carry their own timeout, retry policy, and failure
//! policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::conditions::Conditions;
use super::duration_nanos;

/// Action type tag. Closed set of built-ins plus a `custom` escape hatch
/// that carries a symbolic identifier resolved through the executor
/// registry at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Notification,
    ApiCall,
    WorkflowDispatch,
    #[serde(untagged)]
    Custom(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Notification => "notification",
            Self::ApiCall => "api_call",
            Self::WorkflowDispatch => "workflow_dispatch",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens when an action fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort remaining actions; the execution is marked failed.
    Stop,
    /// Record the failure and proceed to the next action.
    Continue,
    /// Enter the bounded retry loop, then proceed or fail.
    Retry,
    /// Record the failure and proceed (alias semantics of `continue`).
    Skip,
    /// Unrecognized policy string; behaves as `continue` with a warning.
    #[serde(untagged)]
    Other(String),
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Continue
    }
}

impl FailurePolicy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Other(s) => s,
        }
    }
}

/// Bounded exponential backoff envelope for a single action.
///
/// The delay before attempt `k` (0-based) is
/// `min(base_interval * backoff_factor^k, max_interval)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "RetryPolicy::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryPolicy::default_base_interval", with = "duration_nanos")]
    pub base_interval: Duration,
    #[serde(default = "RetryPolicy::default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "RetryPolicy::default_max_interval", with = "duration_nanos")]
    pub max_interval: Duration,
}

impl RetryPolicy {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_base_interval() -> Duration {
        Duration::from_secs(1)
    }
    fn default_backoff_factor() -> f64 {
        2.0
    }
    fn default_max_interval() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_interval: Self::default_base_interval(),
            backoff_factor: Self::default_backoff_factor(),
            max_interval: Self::default_max_interval(),
        }
    }
}

/// An outbound operation invoked when a rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque parameter map interpreted by the executor strategy.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(
        default,
        with = "duration_nanos::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_true() -> bool {
    true
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id: id.into(),
            action_type,
            enabled: true,
            parameters: serde_json::Map::new(),
            timeout: None,
            retry_policy: None,
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Fetch a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// Versioning metadata attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMetadata {
    pub version: u32,
    pub environment: String,
}

impl Default for RuleMetadata {
    fn default() -> Self {
        Self {
            version: 1,
            environment: "production".to_string(),
        }
    }
}

/// A declarative automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub organization: String,
    pub enabled: bool,
    /// Higher priority rules are evaluated and dispatched first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Conditions,
    pub actions: Vec<Action>,
    /// Optional cron expression for host-side scheduled dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub metadata: RuleMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, organization: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            organization: organization.into(),
            enabled: true,
            priority: 0,
            conditions: Conditions::default(),
            actions: Vec::new(),
            schedule: None,
            metadata: RuleMetadata::default(),
            created_at: now,
            updated_at: now,
            created_by: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// A named grouping of rules for bulk enable/disable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub organization: String,
    pub enabled: bool,
    #[serde(default)]
    pub rule_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, organization: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            organization: organization.into(),
            enabled: true,
            rule_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
