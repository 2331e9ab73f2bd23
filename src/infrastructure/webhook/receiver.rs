//! Webhook request parsing.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::Event;

use super::signature::verify_signature;

const DELIVERY_HEADERS: [&str; 2] = ["x-github-delivery", "x-delivery-id"];
const EVENT_HEADERS: [&str; 2] = ["x-github-event", "x-event-type"];
const SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature-256", "x-signature-256"];

/// Turns raw webhook deliveries into normalized events.
///
/// When a secret is configured, the signature header is verified against
/// the raw body before anything is parsed; a bad or missing signature is a
/// `Validation` error and no event is produced.
pub struct WebhookReceiver {
    secret: Option<String>,
}

impl WebhookReceiver {
    pub fn new() -> Self {
        Self { secret: None }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Build a normalized event from HTTP headers and the raw body.
    pub fn parse(&self, headers: &HashMap<String, String>, body: &[u8]) -> EngineResult<Event> {
        let signature = lookup(headers, &SIGNATURE_HEADERS);

        if let Some(secret) = &self.secret {
            let Some(signature) = signature else {
                return Err(EngineError::Validation(
                    "delivery is unsigned but a secret is configured".to_string(),
                ));
            };
            verify_signature(secret, body, signature)?;
        }

        let id = lookup(headers, &DELIVERY_HEADERS)
            .ok_or_else(|| EngineError::Validation("missing delivery id header".to_string()))?
            .to_string();
        let event_type = lookup(headers, &EVENT_HEADERS)
            .ok_or_else(|| EngineError::Validation("missing event type header".to_string()))?
            .to_string();

        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::Validation(format!("payload is not valid json: {e}")))?;

        let action = payload
            .get("action")
            .and_then(|v| v.as_str())
            .map(String::from);
        let organization = payload
            .pointer("/organization/login")
            .or_else(|| payload.pointer("/repository/owner/login"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let repository = payload
            .pointer("/repository/full_name")
            .and_then(|v| v.as_str())
            .map(String::from);
        let sender = payload
            .pointer("/sender/login")
            .and_then(|v| v.as_str())
            .map(String::from);

        let event = Event {
            id,
            event_type,
            action,
            organization,
            repository,
            sender,
            timestamp: Utc::now(),
            payload,
            headers: headers.clone(),
            signature: signature.map(String::from),
        };
        event.validate()?;
        debug!(event_id = %event.id, event_type = %event.event_type, "webhook parsed");
        Ok(event)
    }
}

impl Default for WebhookReceiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive header lookup over the candidate names, in order.
fn lookup<'a>(headers: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    for name in names {
        for (key, value) in headers {
            if key.eq_ignore_ascii_case(name) {
                return Some(value.as_str());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::webhook::signature::sign;
    use serde_json::json;

    fn body() -> Vec<u8> {
        json!({
            "action": "opened",
            "organization": { "login": "acme" },
            "repository": {
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme" }
            },
            "sender": { "login": "octocat" },
            "pull_request": { "number": 7 }
        })
        .to_string()
        .into_bytes()
    }

    fn headers() -> HashMap<String, String> {
        HashMap::from([
            ("X-GitHub-Delivery".to_string(), "d-123".to_string()),
            ("X-GitHub-Event".to_string(), "pull_request".to_string()),
        ])
    }

    #[test]
    fn parses_standard_fields() {
        let event = WebhookReceiver::new().parse(&headers(), &body()).unwrap();
        assert_eq!(event.id, "d-123");
        assert_eq!(event.event_type, "pull_request");
        assert_eq!(event.action.as_deref(), Some("opened"));
        assert_eq!(event.organization, "acme");
        assert_eq!(event.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(event.sender.as_deref(), Some("octocat"));
        assert_eq!(event.payload["pull_request"]["number"], 7);
    }

    #[test]
    fn falls_back_to_generic_headers() {
        let headers = HashMap::from([
            ("x-delivery-id".to_string(), "d-9".to_string()),
            ("x-event-type".to_string(), "push".to_string()),
        ]);
        let event = WebhookReceiver::new().parse(&headers, &body()).unwrap();
        assert_eq!(event.id, "d-9");
        assert_eq!(event.event_type, "push");
    }

    #[test]
    fn organization_falls_back_to_repository_owner() {
        let body = json!({
            "repository": {
                "full_name": "solo/repo",
                "owner": { "login": "solo" }
            }
        })
        .to_string()
        .into_bytes();
        let event = WebhookReceiver::new().parse(&headers(), &body).unwrap();
        assert_eq!(event.organization, "solo");
    }

    #[test]
    fn missing_headers_are_rejected() {
        let receiver = WebhookReceiver::new();
        assert!(receiver.parse(&HashMap::new(), &body()).is_err());

        let only_event = HashMap::from([(
            "X-GitHub-Event".to_string(),
            "push".to_string(),
        )]);
        assert!(receiver.parse(&only_event, &body()).is_err());
    }

    #[test]
    fn signed_delivery_round_trips() {
        let body = body();
        let mut headers = headers();
        headers.insert(
            "X-Hub-Signature-256".to_string(),
            sign("shh", &body),
        );

        let receiver = WebhookReceiver::new().with_secret("shh");
        let event = receiver.parse(&headers, &body).unwrap();
        assert!(event.signature.is_some());

        // tampered body fails
        assert!(receiver.parse(&headers, b"{}").is_err());

        // unsigned delivery fails when a secret is configured
        let unsigned = WebhookReceiver::new().with_secret("shh");
        assert!(unsigned.parse(&self::headers(), &body).is_err());
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = WebhookReceiver::new()
            .parse(&headers(), b"not json")
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
