//! Normalized platform event model.
//!
//! An `Event` is the engine's view of one webhook delivery: a stable id,
//! a type tag, the standard extracted fields, and the raw payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};

/// A normalized record of an external occurrence offered to the engine.
///
/// Produced by the ingress adapter, consumed exactly once by the engine,
/// and retained only inside the execution context of matching rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable id, unique per delivery.
    pub id: String,
    /// Event type tag, e.g. `push`, `pull_request`, `release`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sub-action within the type, e.g. `opened`, `closed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub organization: String,
    /// Repository full name (`owner/name`) when the event is repo-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Login of the user that triggered the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Arrival time stamped by the ingress adapter.
    pub timestamp: DateTime<Utc>,
    /// Opaque nested payload as delivered.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Raw signature header value, when the delivery was signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            action: None,
            organization: organization.into(),
            repository: None,
            sender: None,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
            headers: HashMap::new(),
            signature: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Structural validation applied at ingress.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("event id is empty".to_string()));
        }
        if self.event_type.is_empty() {
            return Err(EngineError::Validation("event type is empty".to_string()));
        }
        if self.organization.is_empty() {
            return Err(EngineError::Validation(
                "event organization is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Branch this event refers to, derived from well-known payload shapes:
    /// `ref` (with any `refs/heads/` prefix stripped), `pull_request.head.ref`,
    /// or a literal `branch` field.
    pub fn branch(&self) -> Option<String> {
        if let Some(r) = self.payload.get("ref").and_then(|v| v.as_str()) {
            return Some(r.strip_prefix("refs/heads/").unwrap_or(r).to_string());
        }
        if let Some(r) = self
            .payload
            .pointer("/pull_request/head/ref")
            .and_then(|v| v.as_str())
        {
            return Some(r.to_string());
        }
        self.payload
            .get("branch")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// File paths touched by this event: the union of
    /// `commits[].added/modified/removed` and a flat `files` array.
    pub fn changed_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        if let Some(commits) = self.payload.get("commits").and_then(|v| v.as_array()) {
            for commit in commits {
                for key in ["added", "modified", "removed"] {
                    if let Some(paths) = commit.get(key).and_then(|v| v.as_array()) {
                        files.extend(
                            paths.iter().filter_map(|p| p.as_str()).map(String::from),
                        );
                    }
                }
            }
        }
        if let Some(paths) = self.payload.get("files").and_then(|v| v.as_array()) {
            files.extend(paths.iter().filter_map(|p| p.as_str()).map(String::from));
        }
        files.sort();
        files.dedup();
        files
    }
}
