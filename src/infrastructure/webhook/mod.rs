//! Webhook ingress: signature verification and event normalization.
//!
//! No HTTP server lives here. The host reads the raw body and headers off
//! its own listener, calls [`WebhookReceiver::parse`], and hands the
//! resulting event to the engine.

pub mod receiver;
pub mod signature;

pub use receiver::WebhookReceiver;
pub use signature::{sign, verify_signature};
