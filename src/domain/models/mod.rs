//! Domain models for events, rules, conditions, executions, and templates.

pub mod conditions;
pub mod config;
pub mod event;
pub mod execution;
pub mod rule;
pub mod template;

pub use conditions::{Conditions, LogicalOperator, MatchOperator, PayloadMatcher, TimeRange};
pub use config::{ApiConfig, DatabaseConfig, EngineConfig, LoggingConfig};
pub use event::Event;
pub use execution::{
    ActionResult, ActionStatus, Execution, ExecutionContext, ExecutionStatus, RepositoryInfo,
    TriggerType,
};
pub use rule::{Action, ActionType, FailurePolicy, RetryPolicy, Rule, RuleMetadata, RuleSet};
pub use template::{RuleTemplate, TemplateVariable};

/// Serde adapter for wire-format durations (nanosecond integers).
pub mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }

    /// `Option<Duration>` variant for optional fields.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Duration>, D::Error> {
            let nanos = Option::<u64>::deserialize(d)?;
            Ok(nanos.map(Duration::from_nanos))
        }
    }
}
