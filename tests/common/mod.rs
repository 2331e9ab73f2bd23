//! Shared fixtures for integration tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hookflow::domain::errors::{EngineError, EngineResult};
use hookflow::domain::models::{Action, ActionType, Event, ExecutionContext, Rule};
use hookflow::domain::ports::{ActionExecutor, JsonMap, RuleStore};
use hookflow::services::evaluator::ConditionEvaluator;
use hookflow::services::executors::ExecutorRegistry;
use hookflow::services::registry::RuleRegistry;

/// One recorded action invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub action_id: String,
    pub at: tokio::time::Instant,
}

/// Scriptable executor for the `record` action type: records every
/// invocation, optionally sleeps, blocks, or fails a configured number of
/// times.
///
/// Parameters understood on actions:
/// - `sleep_ms`: sleep that long before returning
/// - `block`: wait until [`RecordingExecutor::release`] is notified
pub struct RecordingExecutor {
    invocations: Mutex<Vec<Invocation>>,
    fail_counts: Mutex<HashMap<String, u32>>,
    pub release: tokio::sync::Notify,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            fail_counts: Mutex::new(HashMap::new()),
            release: tokio::sync::Notify::new(),
        })
    }

    /// Make the next `times` invocations of `action_id` fail.
    pub fn fail_times(&self, action_id: &str, times: u32) {
        self.fail_counts
            .lock()
            .unwrap()
            .insert(action_id.to_string(), times);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_ids(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|i| i.action_id)
            .collect()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    fn action_type(&self) -> &str {
        "record"
    }

    fn validate(&self, _action: &Action) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, action: &Action, _ctx: &ExecutionContext) -> EngineResult<JsonMap> {
        self.invocations.lock().unwrap().push(Invocation {
            action_id: action.id.clone(),
            at: tokio::time::Instant::now(),
        });

        if let Some(ms) = action.parameters.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if action.parameters.contains_key("block") {
            self.release.notified().await;
        }

        let should_fail = {
            let mut counts = self.fail_counts.lock().unwrap();
            match counts.get_mut(&action.id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(EngineError::ActionFailure {
                action_id: action.id.clone(),
                message: "scripted failure".to_string(),
            });
        }

        let mut result = JsonMap::new();
        result.insert("ok".to_string(), json!(true));
        Ok(result)
    }
}

/// Registry over the given store with the recording executor installed.
pub fn test_registry(
    store: Arc<dyn RuleStore>,
    recorder: Arc<RecordingExecutor>,
) -> Arc<RuleRegistry> {
    let mut executors = ExecutorRegistry::local_only();
    executors.register(recorder);
    Arc::new(RuleRegistry::new(
        store,
        Arc::new(executors),
        ConditionEvaluator::default(),
    ))
}

/// A `record`-type action.
pub fn record_action(id: &str) -> Action {
    Action::new(id, ActionType::Custom("record".to_string()))
}

/// A rule matching any `push` event for the organization.
pub fn push_rule(name: &str, org: &str, priority: i32, action: Action) -> Rule {
    let mut rule = Rule::new(name, org).with_priority(priority).with_action(action);
    rule.conditions.event_types = vec!["push".to_string()];
    rule
}

/// A plain push event for an organization.
pub fn push_event(org: &str) -> Event {
    Event::new("push", org)
        .with_repository(format!("{org}/widgets"))
        .with_sender("octocat")
}

/// Poll an async predicate until it holds or the timeout elapses. Works
/// under paused time as well. Captures must be `Copy` references
/// (`|| async move { ... }`).
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
