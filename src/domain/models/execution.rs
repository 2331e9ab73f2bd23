//! Execution records and context.
//!
//! An `Execution` is one recorded attempt to run a rule against an event.
//! Its status moves monotonically through the state machine; no state is
//! ever re-entered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::duration_nanos;
use super::event::Event;
use super::rule::ActionType;
use crate::domain::errors::{EngineError, EngineResult};

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created on dispatch, before the first action runs.
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// The execution deadline elapsed before the action loop completed.
    Timeout,
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [ExecutionStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled, Self::Timeout],
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the execution was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    Schedule,
    Manual,
    Api,
}

impl Default for TriggerType {
    fn default() -> Self {
        Self::Event
    }
}

/// Outcome of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Failed,
}

/// Per-action result attached to an execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    #[serde(default)]
    pub result: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Resolved repository attributes carried by the execution context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_template: bool,
}

impl RepositoryInfo {
    /// Extract repository attributes from a webhook payload's standard
    /// `repository` object, when present.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let repo = payload.get("repository")?;
        Some(Self {
            name: repo.get("name")?.as_str()?.to_string(),
            full_name: repo
                .get("full_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            default_branch: repo
                .get("default_branch")
                .and_then(|v| v.as_str())
                .unwrap_or("main")
                .to_string(),
            language: repo
                .get("language")
                .and_then(|v| v.as_str())
                .map(String::from),
            topics: repo
                .get("topics")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            visibility: repo
                .get("visibility")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            is_archived: repo
                .get("archived")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            is_template: repo
                .get("is_template")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

/// Side data made available to the evaluator and executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryInfo>,
    pub organization: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ExecutionContext {
    /// Build a context for an event, seeding the standard variables.
    pub fn from_event(event: &Event, environment: impl Into<String>) -> Self {
        let mut variables = HashMap::new();
        variables.insert("event_id".to_string(), event.id.clone());
        variables.insert("event_type".to_string(), event.event_type.clone());
        variables.insert(
            "event_action".to_string(),
            event.action.clone().unwrap_or_default(),
        );
        variables.insert(
            "repository".to_string(),
            event.repository.clone().unwrap_or_default(),
        );
        variables.insert(
            "sender".to_string(),
            event.sender.clone().unwrap_or_default(),
        );

        Self {
            repository: RepositoryInfo::from_payload(&event.payload),
            organization: event.organization.clone(),
            user: event.sender.clone().unwrap_or_default(),
            variables,
            environment: environment.into(),
            metadata: HashMap::new(),
            event: event.clone(),
        }
    }
}

/// A recorded attempt to run a rule against an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub trigger_event_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    /// Sealed copy of the context the execution ran with.
    pub context: ExecutionContext,
    #[serde(default)]
    pub actions: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Execution {
    pub fn new(
        id: Uuid,
        rule_id: Uuid,
        trigger_type: TriggerType,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id,
            rule_id,
            trigger_event_id: context.event.id.clone(),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Pending,
            trigger_type,
            context,
            actions: Vec::new(),
            error: None,
            duration: Duration::ZERO,
            metadata: HashMap::new(),
        }
    }

    /// Transition the status, enforcing the monotonic state machine.
    pub fn transition(&mut self, to: ExecutionStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Stamp the end time, compute the duration, and move to a terminal
    /// status.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) -> EngineResult<()> {
        self.transition(status)?;
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration = (now - self.started_at).to_std().unwrap_or_default();
        self.error = error;
        Ok(())
    }
}
