//! The message envelope: the immutable correlation unit of the bus.
//!
//! An `Envelope` is created once per send (the request) and once per
//! delivered response. It travels unchanged through events, exception
//! handlers and connections, so every field is private and read through
//! accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Value;

/// Whether an envelope carries a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Request,
    Response,
}

/// A message travelling through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    id: Uuid,
    kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    /// Rust type name of the payload as supplied by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_type: Option<String>,
    /// For responses: the id of the request this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<Uuid>,
    timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        address: Option<String>,
        payload: Option<Value>,
        payload_type: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: EnvelopeKind::Request,
            address,
            payload,
            payload_type,
            reply_to: None,
            timestamp: Utc::now(),
        }
    }

    /// Build a response envelope answering `request`.
    ///
    /// The response keeps the request's address so handlers can correlate
    /// without looking the request up.
    pub fn response_to(request: &Envelope, payload: Option<Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: EnvelopeKind::Response,
            address: request.address.clone(),
            payload,
            payload_type: None,
            reply_to: Some(request.id),
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn payload_type(&self) -> Option<&str> {
        self.payload_type.as_deref()
    }

    pub fn reply_to(&self) -> Option<Uuid> {
        self.reply_to
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_response(&self) -> bool {
        self.kind == EnvelopeKind::Response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_has_no_reply_link() {
        let env = Envelope::request(Some("ping".to_string()), None, None);
        assert_eq!(env.kind(), EnvelopeKind::Request);
        assert_eq!(env.address(), Some("ping"));
        assert!(env.reply_to().is_none());
        assert!(env.payload().is_none());
    }

    #[test]
    fn response_references_request() {
        let req = Envelope::request(
            Some("orders.create".to_string()),
            Some(json!({"sku": "A-1"})),
            Some("demo::Order".to_string()),
        );
        let resp = Envelope::response_to(&req, Some(json!("accepted")));

        assert!(resp.is_response());
        assert_eq!(resp.reply_to(), Some(req.id()));
        assert_eq!(resp.address(), Some("orders.create"));
        assert_ne!(resp.id(), req.id());
        assert!(resp.payload_type().is_none());
    }

    #[test]
    fn serialized_request_omits_empty_fields() {
        let env = Envelope::request(None, None, None);
        let text = serde_json::to_string(&env).unwrap();
        assert!(text.contains("\"kind\":\"request\""));
        assert!(!text.contains("reply_to"));
        assert!(!text.contains("address"));

        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.id(), env.id());
    }
}
