//! Result field-name precedence.
//!
//! The remote endpoint is not consistent about field names (`request_id`
//! or `requestId`, `token` or `auth_token`, ...). Each lookup walks a
//! declared, ordered list and takes the first present, non-empty field.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// FieldList
// ============================================================================

/// Ordered list of candidate field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldList(Vec<String>);

impl FieldList {
    /// Creates a list from names, highest precedence first.
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Returns the names in precedence order.
    #[inline]
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if `name` is one of the candidates.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    /// Returns the first present field that is neither `null` nor `""`.
    #[must_use]
    pub fn pick<'a>(&self, object: &'a Map<String, Value>) -> Option<&'a Value> {
        self.0
            .iter()
            .filter_map(|name| object.get(name))
            .find(|value| !is_blank(value))
    }

    /// Returns the first present scalar field that is not blank, rendered
    /// as a string. Objects and arrays are skipped.
    #[must_use]
    pub fn pick_string(&self, object: &Map<String, Value>) -> Option<String> {
        self.0
            .iter()
            .filter_map(|name| object.get(name))
            .filter(|value| !is_blank(value))
            .find_map(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// ============================================================================
// FieldPrecedence
// ============================================================================

/// Every field-name precedence list the bridge consults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldPrecedence {
    /// Correlation id echoed in command replies.
    pub request_id: FieldList,
    /// Auth token in an authenticate reply.
    pub token: FieldList,
    /// User profile in an authenticate reply.
    pub profile: FieldList,
    /// Human-readable message in a failed reply.
    pub error: FieldList,
    /// Array of records in a list-shaped query payload.
    pub list: FieldList,
}

impl Default for FieldPrecedence {
    fn default() -> Self {
        Self {
            request_id: FieldList::new(["request_id", "requestId"]),
            token: FieldList::new(["token", "auth_token", "session_token", "jwt"]),
            profile: FieldList::new(["user", "profile", "account"]),
            error: FieldList::new(["error", "message", "msg"]),
            list: FieldList::new(["products", "data", "items"]),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
