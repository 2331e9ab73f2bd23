//! Ports: trait contracts for external collaborators.

pub mod action_executor;
pub mod ingress;
pub mod memory_store;
pub mod platform_client;
pub mod rule_store;

pub use action_executor::{ActionExecutor, JsonMap};
pub use ingress::{EventFilter, EventValidator};
pub use memory_store::InMemoryRuleStore;
pub use platform_client::PlatformClient;
pub use rule_store::RuleStore;
