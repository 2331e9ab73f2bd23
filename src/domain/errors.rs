//! Domain errors for the hookflow engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engine, registry, evaluator, and stores.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("{queue} queue is full")]
    QueueFull { queue: &'static str },

    #[error("condition evaluation failed: {0}")]
    Evaluation(String),

    #[error("action {action_id} failed: {message}")]
    ActionFailure { action_id: String, message: String },

    #[error("execution deadline elapsed")]
    Timeout,

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("platform api error: {0}")]
    Api(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("rule set not found: {0}")]
    RuleSetNotFound(Uuid),

    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether this error is terminal for an execution (never retried at
    /// the engine level).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Cancelled(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
