//! No-CORS transports.
//!
//! This module gets requests to the remote endpoint and matching responses
//! back to the right caller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  script element   ┌─────────────────┐
//! │QueryTransport│──────────────────►│                 │
//! │              │◄── cb(<json>) ────│                 │
//! └──────┬───────┘                   │ Remote endpoint │
//!        │ RequestRegistry<Value>    │                 │
//! ┌──────┴─────────┐ form → frame    │                 │
//! │CommandTransport│────────────────►│                 │
//! │ MessageListener│◄─ postMessage ──│                 │
//! └──────┬─────────┘                 └─────────────────┘
//!        │ RequestRegistry<ResultMessage>
//! ```
//!
//! # Call Lifecycle
//!
//! 1. Mint a [`CorrelationId`](crate::identifiers::CorrelationId)
//! 2. Acquire page resources into a
//!    [`TransportResources`](crate::registry::TransportResources)
//! 3. Register the call (starts the timer)
//! 4. Start the network side effect (inject script / submit form)
//! 5. The page glue hands the response to the transport, which settles
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Hidden form + invisible frame transport |
//! | `listener` | Page-wide cross-window message listener |
//! | `query` | Script-element transport |

// ============================================================================
// Submodules
// ============================================================================

/// Hidden form + invisible frame transport.
pub mod command;

/// Page-wide message listener.
pub mod listener;

/// Script-element transport.
pub mod query;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use url::Url;

use crate::config::parse_endpoint;
use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::CommandTransport;
pub use listener::{MessageListener, MessageOutcome};
pub use query::QueryTransport;

// ============================================================================
// Endpoint
// ============================================================================

/// Shared, replaceable remote endpoint address.
///
/// Both transports read it at dispatch time, so a replacement affects only
/// calls dispatched afterwards.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    raw: Arc<RwLock<Option<String>>>,
}

impl Endpoint {
    /// Creates an endpoint handle.
    #[must_use]
    pub fn new(raw: Option<String>) -> Self {
        Self {
            raw: Arc::new(RwLock::new(raw)),
        }
    }

    /// Replaces the address. Surrounding whitespace is trimmed.
    pub fn set(&self, raw: impl Into<String>) {
        let raw = raw.into().trim().to_string();
        info!(endpoint = %raw, "Endpoint replaced");
        *self.raw.write() = Some(raw);
    }

    /// Returns the raw address.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.raw.read().clone()
    }

    /// Parses the current address.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if no address is set
    /// - [`Error::Url`](crate::Error::Url) if it is not an absolute URL
    pub fn url(&self) -> Result<Url> {
        parse_endpoint(self.raw.read().as_deref())
    }

    /// Returns the serialized origin of the current address.
    #[must_use]
    pub fn origin(&self) -> Option<String> {
        self.url().ok().map(|url| url.origin().ascii_serialization())
    }
}

// ============================================================================
// Tests
// ============================================================================
