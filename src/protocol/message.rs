//! Cross-window message types.
//!
//! A [`MessageEvent`] is what the page-wide listener receives; a
//! [`ResultMessage`] is the command reply extracted from it.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::FieldPrecedence;
use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, FrameName};

// ============================================================================
// Constants
// ============================================================================

/// Field carrying the success flag.
pub const OK_FIELD: &str = "ok";

/// Message used when a failed reply names no error.
pub const GENERIC_FAILURE: &str = "Request failed";

// ============================================================================
// MessageEvent
// ============================================================================

/// Payload of a cross-window message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    /// Serialized text, usually JSON.
    Text(String),
    /// Already structured value.
    Json(Value),
}

impl From<&str> for MessageData {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageData {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for MessageData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// A message delivered to the page-wide listener.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Origin of the sending window.
    pub origin: String,
    /// Message payload.
    pub data: MessageData,
    /// Frame the message came from, when the glue can tell.
    pub source: Option<FrameName>,
}

impl MessageEvent {
    /// Creates a message with unknown source.
    #[must_use]
    pub fn new(origin: impl Into<String>, data: impl Into<MessageData>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
            source: None,
        }
    }

    /// Sets the sending frame.
    #[inline]
    #[must_use]
    pub fn with_source(mut self, frame: FrameName) -> Self {
        self.source = Some(frame);
        self
    }

    /// Returns the payload as a JSON object.
    ///
    /// `None` for text that is not JSON and for non-object values; those are
    /// somebody else's messages.
    #[must_use]
    pub fn object(&self) -> Option<Map<String, Value>> {
        let value = match &self.data {
            MessageData::Text(text) => serde_json::from_str(text).ok()?,
            MessageData::Json(value) => value.clone(),
        };
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

// ============================================================================
// ResultMessage
// ============================================================================

/// A command reply.
///
/// # Format
///
/// ```json
/// { "request_id": "REQ-...", "ok": true, "token": "abc" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Correlation id echoed by the endpoint.
    pub correlation_id: CorrelationId,
    /// Success flag.
    pub ok: bool,
    /// Every other field of the reply.
    pub payload: Map<String, Value>,
}

impl ResultMessage {
    /// Extracts the correlation id of a message object.
    #[must_use]
    pub fn correlation_id_of(
        object: &Map<String, Value>,
        fields: &FieldPrecedence,
    ) -> Option<CorrelationId> {
        fields.request_id.pick_string(object).map(CorrelationId::from)
    }

    /// Builds a reply from a message object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the correlation id or the boolean `ok`
    /// flag is missing.
    pub fn from_object(mut object: Map<String, Value>, fields: &FieldPrecedence) -> Result<Self> {
        let correlation_id = Self::correlation_id_of(&object, fields)
            .ok_or_else(|| Error::protocol("reply has no request id"))?;

        let ok = match object.remove(OK_FIELD) {
            Some(Value::Bool(ok)) => ok,
            Some(other) => {
                return Err(Error::protocol(format!(
                    "reply {correlation_id} has non-boolean ok: {other}"
                )));
            }
            None => {
                return Err(Error::protocol(format!("reply {correlation_id} has no ok flag")));
            }
        };

        for name in fields.request_id.names() {
            object.remove(name);
        }

        Ok(Self {
            correlation_id,
            ok,
            payload: object,
        })
    }

    /// Returns a payload field.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Returns a payload field as a string slice.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Returns the human-readable failure message.
    #[must_use]
    pub fn error_message(&self, fields: &FieldPrecedence) -> String {
        fields
            .error
            .pick_string(&self.payload)
            .unwrap_or_else(|| GENERIC_FAILURE.to_string())
    }

    /// Converts an `ok: false` reply into an application error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Application`] carrying the server message when `ok`
    /// is `false`.
    pub fn into_result(self, fields: &FieldPrecedence) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::application(self.error_message(fields)))
        }
    }

    /// Returns the reply as seen by the caller: `ok` plus the result fields.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.payload.len() + 1);
        object.insert(OK_FIELD.to_string(), Value::Bool(self.ok));
        object.extend(self.payload.clone());
        Value::Object(object)
    }
}

// ============================================================================
// Tests
// ============================================================================
