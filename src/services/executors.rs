//! Action executor registry and built-in strategies.
//!
//! The registry maps action type tags to executor values registered at
//! startup. The `custom` escape hatch resolves through the same map using
//! the action's symbolic type name, so hosts can plug their own strategies
//! in next to the built-ins.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, ActionType, ExecutionContext};
use crate::domain::ports::{ActionExecutor, JsonMap, PlatformClient};

/// Registry of executor strategies keyed by action type tag.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the notification executor only; remote-call executors
    /// need a platform client (see [`ExecutorRegistry::with_builtins`]).
    pub fn local_only() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NotificationExecutor));
        registry
    }

    /// Registry with all built-in strategies wired to a platform client.
    pub fn with_builtins(client: Arc<dyn PlatformClient>) -> Self {
        let mut registry = Self::local_only();
        registry.register(Arc::new(ApiCallExecutor {
            client: client.clone(),
        }));
        registry.register(Arc::new(WorkflowDispatchExecutor { client }));
        registry
    }

    /// Register a strategy, replacing any previous one with the same tag.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors
            .insert(executor.action_type().to_string(), executor);
    }

    /// Resolve the strategy for an action. `custom` types resolve by their
    /// symbolic name.
    pub fn get(&self, action_type: &ActionType) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action_type.as_str()).cloned()
    }

    /// Action type tags this registry can execute.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Validate an action's shape: known type, non-empty id, and whatever
    /// the strategy itself requires.
    pub fn validate_action(&self, action: &Action) -> EngineResult<()> {
        if action.id.is_empty() {
            return Err(EngineError::Validation("action id is empty".to_string()));
        }
        let Some(executor) = self.get(&action.action_type) else {
            return Err(EngineError::Validation(format!(
                "unknown action type '{}'",
                action.action_type
            )));
        };
        executor.validate(action)
    }
}

/// Substitute `${name}` references with context variables. Unknown names
/// are left in place so misconfigurations stay visible in the output.
pub(crate) fn render_template(template: &str, ctx: &ExecutionContext) -> String {
    let mut rendered = template.to_string();
    for (key, value) in &ctx.variables {
        rendered = rendered.replace(&format!("${{{key}}}"), value);
    }
    rendered
}

/// Emits a rendered message through the tracing pipeline.
pub struct NotificationExecutor;

#[async_trait]
impl ActionExecutor for NotificationExecutor {
    fn action_type(&self) -> &str {
        "notification"
    }

    fn validate(&self, action: &Action) -> EngineResult<()> {
        if action.param_str("message").is_none_or(str::is_empty) {
            return Err(EngineError::Validation(
                "notification action requires a 'message' parameter".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> EngineResult<JsonMap> {
        let template = action.param_str("message").unwrap_or_default();
        let message = render_template(template, ctx);
        let level = action.param_str("level").unwrap_or("info");

        match level {
            "warn" | "warning" => warn!(
                organization = %ctx.organization,
                event_id = %ctx.event.id,
                "{message}"
            ),
            _ => info!(
                organization = %ctx.organization,
                event_id = %ctx.event.id,
                "{message}"
            ),
        }

        let mut result = JsonMap::new();
        result.insert("message".to_string(), json!(message));
        result.insert("level".to_string(), json!(level));
        Ok(result)
    }
}

/// Issues a request against the platform API.
pub struct ApiCallExecutor {
    client: Arc<dyn PlatformClient>,
}

#[async_trait]
impl ActionExecutor for ApiCallExecutor {
    fn action_type(&self) -> &str {
        "api_call"
    }

    fn validate(&self, action: &Action) -> EngineResult<()> {
        if action.param_str("path").is_none_or(str::is_empty) {
            return Err(EngineError::Validation(
                "api_call action requires a 'path' parameter".to_string(),
            ));
        }
        if let Some(method) = action.param_str("method") {
            let known = ["GET", "POST", "PUT", "PATCH", "DELETE"];
            if !known.contains(&method.to_uppercase().as_str()) {
                return Err(EngineError::Validation(format!(
                    "api_call method '{method}' is not supported"
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> EngineResult<JsonMap> {
        let method = action
            .param_str("method")
            .unwrap_or("GET")
            .to_uppercase();
        let path = render_template(action.param_str("path").unwrap_or_default(), ctx);
        let body = action.parameters.get("body");

        let response = self.client.request(&method, &path, body).await?;

        let mut result = JsonMap::new();
        result.insert("method".to_string(), json!(method));
        result.insert("path".to_string(), json!(path));
        result.insert("response".to_string(), response);
        Ok(result)
    }
}

/// Triggers a workflow run in a repository.
pub struct WorkflowDispatchExecutor {
    client: Arc<dyn PlatformClient>,
}

#[async_trait]
impl ActionExecutor for WorkflowDispatchExecutor {
    fn action_type(&self) -> &str {
        "workflow_dispatch"
    }

    fn validate(&self, action: &Action) -> EngineResult<()> {
        if action.param_str("workflow").is_none_or(str::is_empty) {
            return Err(EngineError::Validation(
                "workflow_dispatch action requires a 'workflow' parameter".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> EngineResult<JsonMap> {
        let workflow = action.param_str("workflow").unwrap_or_default();
        let repository = action
            .param_str("repository")
            .map(String::from)
            .or_else(|| ctx.event.repository.clone())
            .ok_or_else(|| EngineError::ActionFailure {
                action_id: action.id.clone(),
                message: "no repository in parameters or event".to_string(),
            })?;
        let reference = action
            .param_str("ref")
            .map(String::from)
            .or_else(|| {
                ctx.repository
                    .as_ref()
                    .map(|r| r.default_branch.clone())
            })
            .unwrap_or_else(|| "main".to_string());
        let inputs = action
            .parameters
            .get("inputs")
            .cloned()
            .unwrap_or_else(|| json!({}));

        self.client
            .dispatch_workflow(&repository, workflow, &reference, &inputs)
            .await?;

        let mut result = JsonMap::new();
        result.insert("workflow".to_string(), json!(workflow));
        result.insert("repository".to_string(), json!(repository));
        result.insert("ref".to_string(), json!(reference));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Event;
    use serde_json::Value;
    use std::sync::Mutex;

    struct FakeClient {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeClient {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for FakeClient {
        async fn request(
            &self,
            method: &str,
            path: &str,
            _body: Option<&Value>,
        ) -> EngineResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), path.to_string()));
            Ok(json!({ "ok": true }))
        }

        async fn dispatch_workflow(
            &self,
            repository: &str,
            workflow: &str,
            _reference: &str,
            _inputs: &Value,
        ) -> EngineResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("DISPATCH".to_string(), format!("{repository}:{workflow}")));
            Ok(())
        }
    }

    fn ctx() -> ExecutionContext {
        let event = Event::new("push", "acme")
            .with_repository("acme/widgets")
            .with_sender("octocat");
        ExecutionContext::from_event(&event, "test")
    }

    #[test]
    fn template_rendering_substitutes_variables() {
        let ctx = ctx();
        let rendered = render_template("push to ${repository} by ${sender}", &ctx);
        assert_eq!(rendered, "push to acme/widgets by octocat");
        // unknown names stay visible
        assert_eq!(render_template("${nope}", &ctx), "${nope}");
    }

    #[tokio::test]
    async fn notification_requires_message() {
        let executor = NotificationExecutor;
        let action = Action::new("n1", ActionType::Notification);
        assert!(executor.validate(&action).is_err());

        let action = action.with_parameter("message", json!("deploy ${event_type}"));
        executor.validate(&action).unwrap();
        let result = executor.execute(&action, &ctx()).await.unwrap();
        assert_eq!(result["message"], "deploy push");
    }

    #[tokio::test]
    async fn api_call_goes_through_the_client() {
        let client = Arc::new(FakeClient::new());
        let executor = ApiCallExecutor {
            client: client.clone(),
        };

        let action = Action::new("a1", ActionType::ApiCall)
            .with_parameter("method", json!("post"))
            .with_parameter("path", json!("/repos/${repository}/issues"));
        executor.validate(&action).unwrap();
        let result = executor.execute(&action, &ctx()).await.unwrap();

        assert_eq!(result["method"], "POST");
        let calls = client.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            ("POST".to_string(), "/repos/acme/widgets/issues".to_string())
        );
    }

    #[tokio::test]
    async fn workflow_dispatch_defaults_repository_from_event() {
        let client = Arc::new(FakeClient::new());
        let executor = WorkflowDispatchExecutor {
            client: client.clone(),
        };
        let action =
            Action::new("w1", ActionType::WorkflowDispatch).with_parameter("workflow", json!("ci.yml"));
        executor.execute(&action, &ctx()).await.unwrap();

        let calls = client.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            ("DISPATCH".to_string(), "acme/widgets:ci.yml".to_string())
        );
    }

    #[test]
    fn registry_resolves_custom_types_by_name() {
        struct Echo;
        #[async_trait]
        impl ActionExecutor for Echo {
            fn action_type(&self) -> &str {
                "echo"
            }
            fn validate(&self, _action: &Action) -> EngineResult<()> {
                Ok(())
            }
            async fn execute(
                &self,
                _action: &Action,
                _ctx: &ExecutionContext,
            ) -> EngineResult<JsonMap> {
                Ok(JsonMap::new())
            }
        }

        let mut registry = ExecutorRegistry::local_only();
        registry.register(Arc::new(Echo));

        assert!(registry
            .get(&ActionType::Custom("echo".to_string()))
            .is_some());
        assert!(registry.get(&ActionType::ApiCall).is_none());
        assert_eq!(registry.supported_types(), vec!["echo", "notification"]);

        let unknown = Action::new("x", ActionType::Custom("nope".to_string()));
        assert!(matches!(
            registry.validate_action(&unknown),
            Err(EngineError::Validation(_))
        ));
    }
}
