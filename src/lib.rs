//! nocors-bridge - Async request/response bridge for endpoints without CORS.
//!
//! This library talks to a remote endpoint that sends no cross-origin
//! headers, using the two channels a browser page always has:
//!
//! - **Queries** (reads): a script element whose address carries the
//!   parameters; the loaded script invokes a uniquely named callback
//! - **Commands** (writes): a hidden form posted into an invisible frame;
//!   the reply document posts a message back to the page
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐   ┌────────────────┐   ┌─────────────────┐   ┌──────┐
//! │ Bridge │──►│ QueryTransport │──►│ RequestRegistry │◄──│      │
//! │        │──►│CommandTransport│──►│  (per transport)│   │ Page │
//! │        │──►│  SessionStore  │──────────────────────►  │      │
//! └────────┘   └────────────────┘   └─────────────────┘   └──────┘
//! ```
//!
//! Key design principles:
//!
//! - Every call is registered before its network side effect starts
//! - Every call settles exactly once: reply, load failure, timeout or dispose
//! - Page resources are owned by the registry entry and released on settlement
//! - Replies are matched by correlation id only, never by arrival order
//!
//! The page itself sits behind the [`Page`] trait. The host glue forwards
//! script bodies, callback invocations, messages and storage events to the
//! [`Bridge`]; [`MemoryPage`] implements the trait in memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nocors_bridge::{Bridge, BridgeConfig, MemoryPage, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let page = Arc::new(MemoryPage::new("https://shop.example.com/")?);
//!
//!     let config = BridgeConfig::builder()
//!         .endpoint("https://script.google.com/macros/s/ID/exec")
//!         .allow_apps_script_origins()
//!         .build()?;
//!
//!     let bridge = Bridge::new(page, config);
//!     let session = bridge.login("a@b.com", "secret").await?;
//!     println!("Logged in with token {}", session.token);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | [`Bridge`] facade with named operations |
//! | [`config`] | Configuration, origin policy, field precedence |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Correlation ids, element handles, frame names |
//! | [`page`] | [`Page`] abstraction and [`MemoryPage`] |
//! | [`protocol`] | Wire formats of both transports |
//! | [`registry`] | In-flight call table |
//! | [`session`] | Token and session persistence |
//! | [`transport`] | Query and command transports |

// ============================================================================
// Modules
// ============================================================================

/// Named domain operations.
///
/// Use [`Bridge::new`] to create a client.
pub mod api;

/// Configuration.
///
/// Use [`BridgeConfig::builder()`] or [`BridgeConfig::from_json`].
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Host page abstraction.
pub mod page;

/// Wire formats.
///
/// Query addresses and bodies, command forms and reply messages.
pub mod protocol;

/// In-flight call table.
pub mod registry;

/// Session persistence.
pub mod session;

/// No-CORS transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Facade
pub use api::Bridge;

// Configuration types
pub use config::{
    BridgeConfig, BridgeConfigBuilder, FieldList, FieldPrecedence, OriginAllowList, OriginPolicy,
    SessionConfig,
};

// Error types
pub use error::{Error, ErrorKind, Result};

// Identifier types
pub use identifiers::{CorrelationId, ElementHandle, FrameName};

// Page types
pub use page::{Cookie, FormMethod, FormSpec, MemoryPage, Page, PageLocation};

// Protocol types
pub use protocol::{MessageData, MessageEvent, ResultMessage};

// Registry types
pub use registry::{PendingCall, RequestRegistry, TransportResources};

// Session types
pub use session::{SessionChange, SessionRecord, SessionStore};

// Transport types
pub use transport::{CommandTransport, Endpoint, MessageListener, MessageOutcome, QueryTransport};
