//! Query wire contract.
//!
//! # Request
//!
//! `GET <endpoint>?action=<name>&callback=<generatedName>&<params...>`
//!
//! # Response
//!
//! Exactly one invocation of the generated callback, optionally followed by
//! a semicolon:
//!
//! ```text
//! __nocors_cb_3f2a...([{"id":"42","nom":"Test"}]);
//! ```
//!
//! Anything else is a protocol error, never an empty result.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

use super::flatten_value;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter naming the operation.
pub const ACTION_PARAM: &str = "action";

/// Query parameter naming the generated callback.
pub const CALLBACK_PARAM: &str = "callback";

static INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\((.*)\)\s*;?\s*$")
        .unwrap_or_else(|e| panic!("invocation pattern must compile: {e}"))
});

// ============================================================================
// Request
// ============================================================================

/// Builds the address of a query.
///
/// Caller parameters named `action` or `callback` are dropped: the callback
/// name is owned by the bridge.
#[must_use]
pub fn query_url(
    endpoint: &Url,
    action: &str,
    callback: &CorrelationId,
    params: &Map<String, Value>,
) -> Url {
    let mut url = endpoint.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair(ACTION_PARAM, action);
        pairs.append_pair(CALLBACK_PARAM, callback.as_str());
        for (key, value) in params {
            if key == ACTION_PARAM || key == CALLBACK_PARAM {
                warn!(param = %key, "Reserved query parameter ignored");
                continue;
            }
            pairs.append_pair(key, &flatten_value(value));
        }
    }
    url
}

// ============================================================================
// Response
// ============================================================================

/// Parses a query response body.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the body is not a single invocation of
/// `expected` with one JSON argument.
pub fn parse_script_body(body: &str, expected: &CorrelationId) -> Result<Value> {
    let captures = INVOCATION
        .captures(body)
        .ok_or_else(|| Error::protocol("response is not a callback invocation"))?;

    let name = &captures[1];
    if name != expected.as_str() {
        return Err(Error::protocol(format!(
            "response invokes {name}, expected {expected}"
        )));
    }

    serde_json::from_str(&captures[2])
        .map_err(|e| Error::protocol(format!("callback argument is not JSON: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
