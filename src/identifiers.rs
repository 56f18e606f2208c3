//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing a correlation id with an element handle
//! or a frame name at compile time.
//!
//! | Type | Format | Minted by |
//! |------|--------|-----------|
//! | [`CorrelationId`] | `REQ-<uuid>` or `__nocors_cb_<uuid>` | transports |
//! | [`ElementHandle`] | process-wide counter | [`Page`](crate::page::Page) implementations |
//! | [`FrameName`] | `nocors_frame_<correlation id>` | command transport |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Prefix of command correlation ids.
pub const REQUEST_PREFIX: &str = "REQ-";

/// Prefix of generated query callback names.
pub const CALLBACK_PREFIX: &str = "__nocors_cb_";

/// Prefix of invisible frame names.
pub const FRAME_PREFIX: &str = "nocors_frame_";

static NEXT_ELEMENT: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// CorrelationId
// ============================================================================

/// Opaque, process-unique key linking one dispatched call to its reply.
///
/// For queries the id doubles as the global callback name, so it only ever
/// contains `[A-Za-z0-9_-]` and, with the callback prefix, `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mints a fresh id for a command call.
    #[must_use]
    pub fn request() -> Self {
        Self(format!("{REQUEST_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Mints a fresh id usable as a global callback name.
    #[must_use]
    pub fn callback() -> Self {
        Self(format!("{CALLBACK_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id names a query callback.
    #[inline]
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.0.starts_with(CALLBACK_PREFIX)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ElementHandle
// ============================================================================

/// Reference to a transient element attached to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    /// Allocates the next handle.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ELEMENT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el#{}", self.0)
    }
}

// ============================================================================
// FrameName
// ============================================================================

/// Name of the invisible frame a command form targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameName(String);

impl FrameName {
    /// Derives the frame name owned by a command call.
    #[must_use]
    pub fn for_request(id: &CorrelationId) -> Self {
        Self(format!("{FRAME_PREFIX}{id}"))
    }

    /// Returns the name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
