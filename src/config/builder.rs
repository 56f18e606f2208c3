//! Builder pattern for bridge configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use nocors_bridge::{BridgeConfig, OriginPolicy};
//!
//! # fn example() -> nocors_bridge::Result<()> {
//! let config = BridgeConfig::builder()
//!     .endpoint("https://script.google.com/macros/s/ID/exec")
//!     .timeout(Duration::from_secs(20))
//!     .allow_apps_script_origins()
//!     .origin_policy(OriginPolicy::Strict)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

use super::origin::APPS_SCRIPT_ORIGINS;
use super::{BridgeConfig, FieldPrecedence, OriginPolicy, SessionConfig, parse_endpoint};

// ============================================================================
// BridgeConfigBuilder
// ============================================================================

/// Builder for a validated [`BridgeConfig`].
#[derive(Debug, Default, Clone)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Creates a builder holding the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote endpoint base address.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the per-request deadline.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Adds an allowed reply origin or `scheme://*.domain` pattern.
    #[inline]
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.allowed_origins.push(origin);
        self
    }

    /// Adds the origins Google Apps Script web apps reply from.
    #[must_use]
    pub fn allow_apps_script_origins(mut self) -> Self {
        for origin in APPS_SCRIPT_ORIGINS {
            self.config.allowed_origins.push(*origin);
        }
        self
    }

    /// Sets the reply-target origin policy.
    #[inline]
    #[must_use]
    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.config.origin_policy = policy;
        self
    }

    /// Sets the field-name precedence lists.
    #[inline]
    #[must_use]
    pub fn fields(mut self, fields: FieldPrecedence) -> Self {
        self.config.fields = fields;
        self
    }

    /// Sets the session persistence settings.
    #[inline]
    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Sets the cookie domain shared by sibling subdomains.
    #[inline]
    #[must_use]
    pub fn cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.session.cookie_domain = Some(domain.into());
        self
    }

    /// Sets the cap on in-flight calls per transport.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.config.max_pending = max_pending;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is missing, the timeout is zero or
    ///   `max_pending` is zero
    /// - [`Error::Url`] if the endpoint is not an absolute URL
    pub fn build(self) -> Result<BridgeConfig> {
        parse_endpoint(self.config.endpoint.as_deref())?;

        if self.config.timeout_ms == 0 {
            return Err(Error::config("timeout must be greater than zero"));
        }
        if self.config.max_pending == 0 {
            return Err(Error::config("max_pending must be greater than zero"));
        }

        Ok(self.config)
    }
}

// ============================================================================
// Tests
// ============================================================================
