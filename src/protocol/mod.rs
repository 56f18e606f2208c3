//! Wire contracts toward the remote endpoint.
//!
//! Both contracts target the same endpoint base address.
//!
//! | Contract | Direction | Shape |
//! |----------|-----------|-------|
//! | Query request | Page → Remote | `GET ?action=..&callback=..&params` |
//! | Query response | Remote → Page | `<callback>(<json>);` script body |
//! | Command request | Page → Remote | hidden form POST into an invisible frame |
//! | Command reply | Remote → Page | cross-window message `{request_id, ok, ...}` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command form fields |
//! | `message` | Cross-window message and reply types |
//! | `query` | Query address and response body parsing |

// ============================================================================
// Submodules
// ============================================================================

/// Command form fields.
pub mod command;

/// Cross-window message types.
pub mod message;

/// Query address and response body.
pub mod query;

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::CommandRequest;
pub use message::{MessageData, MessageEvent, ResultMessage};
pub use query::{parse_script_body, query_url};

// ============================================================================
// Helpers
// ============================================================================

/// Renders a JSON value as a form or query field.
///
/// Strings are sent as-is, `null` as an empty string, everything else as
/// compact JSON text.
#[must_use]
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_flatten_value() {
        assert_eq!(flatten_value(&json!(null)), "");
        assert_eq!(flatten_value(&json!("a b")), "a b");
        assert_eq!(flatten_value(&json!(12.5)), "12.5");
        assert_eq!(flatten_value(&json!(false)), "false");
        assert_eq!(flatten_value(&json!({ "k": [1, 2] })), r#"{"k":[1,2]}"#);
    }
}
