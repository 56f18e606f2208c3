//! Bridge configuration.
//!
//! [`BridgeConfig`] is built in code with [`BridgeConfig::builder()`] or
//! deserialized from the JSON configuration object a page embeds:
//!
//! ```ignore
//! use nocors_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::from_json(r#"{
//!     "scriptUrl": "https://script.google.com/macros/s/ID/exec",
//!     "timeoutMs": 20000,
//!     "postMessageTargetOrigin": "*"
//! }"#)?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent configuration builder |
//! | `fields` | Result field-name precedence |
//! | `origin` | Origin allow-list and reply-target policy |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for [`BridgeConfig`].
pub mod builder;

/// Result field-name precedence lists.
pub mod fields;

/// Origin allow-list and reply-target origin policy.
pub mod origin;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeConfigBuilder;
pub use fields::{FieldList, FieldPrecedence};
pub use origin::{APPS_SCRIPT_ORIGINS, OriginAllowList, OriginPolicy, WILDCARD_ORIGIN};

// ============================================================================
// Constants
// ============================================================================

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Default cap on in-flight calls per transport.
pub const DEFAULT_MAX_PENDING: usize = 100;

/// Default cookie lifetime (30 days).
pub const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Error message for a missing endpoint.
pub const ENDPOINT_MISSING: &str = "SCRIPT_URL_MISSING";

// ============================================================================
// BridgeConfig
// ============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Remote endpoint base address.
    #[serde(alias = "scriptUrl", alias = "apiBase")]
    pub endpoint: Option<String>,

    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,

    /// Origins whose messages may settle a command.
    pub allowed_origins: OriginAllowList,

    /// Strictness of the origin hint sent with commands.
    pub origin_policy: OriginPolicy,

    /// Forced origin hint; overrides `origin_policy` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_message_target_origin: Option<String>,

    /// Field-name precedence lists.
    pub fields: FieldPrecedence,

    /// Session persistence settings.
    pub session: SessionConfig,

    /// Cap on in-flight calls per transport.
    pub max_pending: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            allowed_origins: OriginAllowList::default(),
            origin_policy: OriginPolicy::default(),
            post_message_target_origin: None,
            fields: FieldPrecedence::default(),
            session: SessionConfig::default(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl BridgeConfig {
    /// Creates a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Parses a JSON configuration object.
    ///
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the per-request deadline.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parses the endpoint address.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint is set
    /// - [`Error::Url`] if the endpoint is not an absolute URL
    pub fn endpoint_url(&self) -> Result<Url> {
        parse_endpoint(self.endpoint.as_deref())
    }

    /// Returns the effective reply-target policy.
    #[must_use]
    pub fn effective_origin_policy(&self) -> OriginPolicy {
        match &self.post_message_target_origin {
            Some(origin) if !origin.trim().is_empty() => OriginPolicy::Fixed {
                origin: origin.trim().to_string(),
            },
            _ => self.origin_policy.clone(),
        }
    }
}

/// Parses an optional endpoint string.
pub(crate) fn parse_endpoint(endpoint: Option<&str>) -> Result<Url> {
    let endpoint = endpoint
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::config(ENDPOINT_MISSING))?;
    Ok(Url::parse(endpoint)?)
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Keys and cookie scope used by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Local-record key holding the token.
    pub token_key: String,
    /// Local-record key holding the serialized session record.
    pub session_key: String,
    /// Local-record key other tabs watch for session changes.
    pub marker_key: String,
    /// Cookie name mirroring the token.
    pub cookie_name: String,
    /// Cookie domain; derived from the page host when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,
    /// Cookie lifetime in seconds.
    pub cookie_max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_key: "nocors_token".to_string(),
            session_key: "nocors_session".to_string(),
            marker_key: "nocors_session_changed".to_string(),
            cookie_name: "nocors_token".to_string(),
            cookie_domain: None,
            cookie_max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
