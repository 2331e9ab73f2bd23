//! Action executor port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{Action, ExecutionContext};

/// Result map produced by an action.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A strategy that executes one action type.
///
/// Executors are stateless and safe to invoke from many workers; they are
/// registered as values in the executor registry at startup.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The action type tag this strategy handles.
    fn action_type(&self) -> &str;

    /// Validate the shape of an action's parameters without executing it.
    fn validate(&self, action: &Action) -> EngineResult<()>;

    /// Execute the action with the shared execution context.
    async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> EngineResult<JsonMap>;
}
