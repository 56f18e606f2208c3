//! Host page abstraction.
//!
//! The bridge performs every page side effect through the [`Page`] trait:
//! code-loading elements, invisible frames, hidden forms, temporary global
//! callbacks, cookies and the durable local record. A wasm glue layer or a
//! browser driver implements it for a live document; [`MemoryPage`] keeps the
//! whole page in memory.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cookie` | Cookie type |
//! | `memory` | In-memory page |

// ============================================================================
// Submodules
// ============================================================================

/// Cookie type.
pub mod cookie;

/// In-memory page implementation.
pub mod memory;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::Url;

use crate::error::Result;
use crate::identifiers::{CorrelationId, ElementHandle, FrameName};

// ============================================================================
// Re-exports
// ============================================================================

pub use cookie::Cookie;
pub use memory::{MemoryElement, MemoryPage};

// ============================================================================
// Page
// ============================================================================

/// Side-effect surface of the hosting page.
///
/// All methods are synchronous: on a real page they map to single DOM calls
/// and never yield, which is what lets the registry register a call in the
/// same step that triggers its network side effect.
pub trait Page: Send + Sync {
    /// Returns where the page is loaded from.
    fn location(&self) -> PageLocation;

    /// Defines a temporary global callback a loaded script can invoke.
    fn install_callback(&self, name: &CorrelationId) -> Result<()>;

    /// Deletes a temporary global callback. Unknown names are ignored.
    fn remove_callback(&self, name: &CorrelationId);

    /// Appends an async code-loading element whose source is `src`.
    fn inject_script(&self, src: &Url) -> Result<ElementHandle>;

    /// Appends an invisible frame named `name`.
    fn create_frame(&self, name: &FrameName) -> Result<ElementHandle>;

    /// Appends a hidden form built from `form`.
    fn create_form(&self, form: &FormSpec) -> Result<ElementHandle>;

    /// Submits a previously created form.
    fn submit_form(&self, form: ElementHandle) -> Result<()>;

    /// Detaches an element. Unknown or already removed handles are ignored.
    fn remove_element(&self, element: ElementHandle);

    /// Reads a cookie visible to the page.
    fn get_cookie(&self, name: &str) -> Option<Cookie>;

    /// Writes a cookie.
    fn set_cookie(&self, cookie: Cookie) -> Result<()>;

    /// Expires a cookie on the given domain.
    fn delete_cookie(&self, name: &str, domain: Option<&str>);

    /// Reads a key from the durable local record.
    fn storage_get(&self, key: &str) -> Option<String>;

    /// Writes a key to the durable local record.
    fn storage_set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a key from the durable local record.
    fn storage_remove(&self, key: &str);
}

// ============================================================================
// PageLocation
// ============================================================================

/// Origin information of the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    /// Scheme with trailing colon, e.g. `https:`.
    pub protocol: String,
    /// Lowercased host name, empty for `file:` pages.
    pub hostname: String,
    /// Serialized origin; `null` for opaque origins.
    pub origin: String,
}

impl PageLocation {
    /// Derives the location from a page URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self {
            protocol: format!("{}:", url.scheme()),
            hostname: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            origin: url.origin().ascii_serialization(),
        }
    }

    /// Returns `true` for pages opened from the local filesystem.
    #[inline]
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.protocol == "file:" || self.origin == "null"
    }

    /// Returns `true` for pages served over TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol == "https:"
    }
}

// ============================================================================
// FormSpec
// ============================================================================

/// HTTP method of a hidden form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormMethod {
    /// `GET`
    Get,
    /// `POST`
    #[default]
    Post,
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Description of a hidden form targeting an invisible frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    /// Name of the frame the submission navigates.
    pub target: FrameName,
    /// Submission method.
    pub method: FormMethod,
    /// Destination address.
    pub action: Url,
    /// Hidden input fields, in document order.
    pub fields: Vec<(String, String)>,
}

impl FormSpec {
    /// Creates a POST form with no fields.
    #[must_use]
    pub fn post(target: FrameName, action: Url) -> Self {
        Self {
            target,
            method: FormMethod::Post,
            action,
            fields: Vec::new(),
        }
    }

    /// Appends a hidden field.
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Returns the first value of a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the fields as an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn encoded_body(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

// ============================================================================
// Tests
// ============================================================================
