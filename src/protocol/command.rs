//! Command wire contract.
//!
//! # Request
//!
//! A hidden form POSTed into an invisible frame:
//!
//! | Field | Value |
//! |-------|-------|
//! | `transport` | `iframe` |
//! | `request_id` | correlation id |
//! | `origin` | reply-target origin hint or `*` |
//! | `action` | operation name |
//! | ... | flattened payload fields |
//!
//! # Reply
//!
//! The endpoint renders a document that posts
//! `{ "request_id": ..., "ok": true|false, ...resultFields }` to the caller
//! window; see [`ResultMessage`](super::ResultMessage).

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::identifiers::{CorrelationId, FrameName};
use crate::page::FormSpec;

use super::flatten_value;

// ============================================================================
// Constants
// ============================================================================

/// Field carrying the transport marker.
pub const TRANSPORT_FIELD: &str = "transport";

/// Transport marker value for frame-delivered commands.
pub const TRANSPORT_MARKER: &str = "iframe";

/// Field carrying the correlation id.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Field carrying the reply-target origin hint.
pub const ORIGIN_FIELD: &str = "origin";

/// Field naming the operation.
pub const ACTION_FIELD: &str = "action";

const RESERVED_FIELDS: &[&str] = &[TRANSPORT_FIELD, REQUEST_ID_FIELD, ORIGIN_FIELD, ACTION_FIELD];

// ============================================================================
// CommandRequest
// ============================================================================

/// One command as it goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest<'a> {
    /// Correlation id of the call.
    pub id: &'a CorrelationId,
    /// Operation name.
    pub action: &'a str,
    /// Reply-target origin hint.
    pub origin: &'a str,
    /// Operation fields.
    pub payload: &'a Map<String, Value>,
}

impl CommandRequest<'_> {
    /// Builds the hidden form targeting `frame`.
    ///
    /// Payload fields that collide with a bridge field are dropped.
    #[must_use]
    pub fn to_form(&self, endpoint: &Url, frame: FrameName) -> FormSpec {
        let mut form = FormSpec::post(frame, endpoint.clone());
        form.push_field(TRANSPORT_FIELD, TRANSPORT_MARKER);
        form.push_field(REQUEST_ID_FIELD, self.id.as_str());
        form.push_field(ORIGIN_FIELD, self.origin);
        form.push_field(ACTION_FIELD, self.action);

        for (key, value) in self.payload {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                warn!(request_id = %self.id, field = %key, "Reserved command field ignored");
                continue;
            }
            form.push_field(key.clone(), flatten_value(value));
        }
        form
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::page::FormMethod;

    #[test]
    fn test_form_fields() {
        let id = CorrelationId::from("REQ-1");
        let Value::Object(payload) = json!({
            "email": "a@b.com",
            "password": "x",
            "request_id": "spoofed",
            "remember": true,
        }) else {
            unreachable!()
        };

        let request = CommandRequest {
            id: &id,
            action: "login",
            origin: "https://shop.example.com",
            payload: &payload,
        };
        let endpoint = Url::parse("https://remote.example/exec").unwrap();
        let form = request.to_form(&endpoint, FrameName::for_request(&id));

        assert_eq!(form.method, FormMethod::Post);
        assert_eq!(form.action, endpoint);
        assert_eq!(form.target, FrameName::for_request(&id));
        assert_eq!(form.field("transport"), Some("iframe"));
        assert_eq!(form.field("request_id"), Some("REQ-1"));
        assert_eq!(form.field("origin"), Some("https://shop.example.com"));
        assert_eq!(form.field("action"), Some("login"));
        assert_eq!(form.field("email"), Some("a@b.com"));
        assert_eq!(form.field("remember"), Some("true"));
        assert_eq!(
            form.fields.iter().filter(|(k, _)| k == "request_id").count(),
            1
        );
    }
}
