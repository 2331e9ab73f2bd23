//! Source-control platform client port.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::EngineResult;

/// Outbound API contract used by remote-call actions.
///
/// The production implementation lives in `infrastructure::api`; tests
/// substitute an in-process fake.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Issue a request against the platform API and return the decoded
    /// JSON response (`Value::Null` for empty bodies).
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> EngineResult<Value>;

    /// Trigger a workflow run in a repository.
    async fn dispatch_workflow(
        &self,
        repository: &str,
        workflow: &str,
        reference: &str,
        inputs: &Value,
    ) -> EngineResult<()>;
}
