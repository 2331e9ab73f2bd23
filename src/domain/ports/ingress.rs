//! Ingress hook ports consulted by `Engine::submit`.

use crate::domain::errors::EngineResult;
use crate::domain::models::Event;

/// External event validation, applied before any queueing. A rejection is
/// surfaced to the submitter as a `Validation` error and never retried.
pub trait EventValidator: Send + Sync {
    fn validate(&self, event: &Event) -> EngineResult<()>;
}

/// External event filter, applied when rule filtering is enabled. Filtered
/// events are accepted and counted as dropped.
pub trait EventFilter: Send + Sync {
    fn accept(&self, event: &Event) -> bool;
}
