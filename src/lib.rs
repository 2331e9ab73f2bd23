//! Hookflow - rule-driven automation engine for source-control platform events.
//!
//! Webhook events come in, declarative rules are matched against them, and
//! the actions of each matching rule are dispatched under per-action
//! timeouts, retries, and failure policies:
//! - Bounded ingress queue with a two-stage (match / execute) worker pool
//! - Compound boolean condition trees with payload matchers and glob sets
//! - Per-action retry with exponential backoff and failure policies
//! - SQLite-backed rule/template/execution store behind a port trait
//! - Live metrics plane and cooperative drain on shutdown
//!
//! The engine is embedded: there is no CLI or HTTP server in this crate.
//! Hosts own the listener and hand normalized events to [`Engine::submit`],
//! typically via [`infrastructure::webhook::WebhookReceiver`].

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::config::EngineConfig;
pub use domain::models::event::Event;
pub use domain::models::rule::Rule;
pub use services::engine::Engine;
pub use services::registry::RuleRegistry;
