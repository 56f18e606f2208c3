//! Error types for the no-CORS bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use nocors_bridge::{Bridge, Error, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     match bridge.login("a@b.com", "secret").await {
//!         Err(e) if e.is_timeout() => println!("service is slow, try again"),
//!         Err(Error::Application { message }) => println!("{message}"),
//!         Err(e) => return Err(e),
//!         Ok(_) => {}
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::TransportLoad`], [`Error::Timeout`] |
//! | Wire | [`Error::Protocol`] |
//! | Remote | [`Error::Application`] |
//! | Session | [`Error::Storage`] |
//! | External | [`Error::Json`], [`Error::Url`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::CorrelationId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Every failure is scoped to exactly one call; none of them is fatal to the
/// bridge or to other in-flight calls.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the bridge configuration is invalid, for example when no
    /// endpoint is set.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The query element or the command frame failed to load or navigate.
    #[error("Transport load failed for {request_id}: {message}")]
    TransportLoad {
        /// The call whose transport failed.
        request_id: CorrelationId,
        /// Description of the load failure.
        message: String,
    },

    /// No correlated result arrived before the deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The call that timed out.
        request_id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Wire Errors
    // ========================================================================
    /// The response did not match the expected wire shape.
    ///
    /// Also used when too many calls are pending. Usually a configuration
    /// problem rather than a transient condition.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The remote endpoint replied with `ok: false`.
    #[error("{message}")]
    Application {
        /// Message provided by the remote endpoint.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session record could not be read or written.
    #[error("Session storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The registry was dropped before the call settled.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// ErrorKind
// ============================================================================

/// Coarse classification for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The service is slow or unreachable; trying again may help.
    Transient,
    /// The server rejected the operation with its own message.
    Rejected,
    /// Wire or configuration mismatch; retrying will not help.
    Misconfigured,
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport load error.
    #[inline]
    pub fn transport_load(request_id: CorrelationId, message: impl Into<String>) -> Self {
        Self::TransportLoad {
            request_id,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(request_id: CorrelationId, timeout_ms: u64) -> Self {
        Self::Timeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an application error.
    #[inline]
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the remote endpoint rejected the call.
    #[inline]
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Returns `true` if the reply did not match the wire contract.
    #[inline]
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Json(_))
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry. The bridge itself never
    /// retries; this is a hint for the caller.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::TransportLoad { .. })
    }

    /// Classifies the error for user-visible feedback.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::TransportLoad { .. } => ErrorKind::Transient,
            Self::Application { .. } => ErrorKind::Rejected,
            _ => ErrorKind::Misconfigured,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
