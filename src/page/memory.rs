//! In-memory page.
//!
//! Records every element, callback, cookie and storage key the bridge
//! touches, so a caller can drive the bridge headlessly and assert that no
//! transport resource outlives its call.
//!
//! Pages created with [`MemoryPage::sibling`] share one cookie jar, which
//! models sibling subdomains reading a parent-domain cookie.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, ElementHandle, FrameName};

use super::{Cookie, FormSpec, Page, PageLocation};

// ============================================================================
// Types
// ============================================================================

/// Cookie jar keyed by `(name, domain)`.
type CookieJar = FxHashMap<(String, String), Cookie>;

/// An element attached to the in-memory page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryElement {
    /// Code-loading element.
    Script {
        /// Source address.
        src: Url,
    },
    /// Invisible frame.
    Frame {
        /// Frame name.
        name: FrameName,
    },
    /// Hidden form.
    Form {
        /// Action, target and fields.
        form: FormSpec,
        /// Whether the form was submitted.
        submitted: bool,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    elements: FxHashMap<ElementHandle, MemoryElement>,
    callbacks: FxHashSet<CorrelationId>,
    storage: FxHashMap<String, String>,
    submissions: Vec<FormSpec>,
    fail_scripts: bool,
    fail_frames: bool,
    fail_submit: bool,
}

// ============================================================================
// MemoryPage
// ============================================================================

/// A [`Page`] kept entirely in memory.
#[derive(Debug)]
pub struct MemoryPage {
    location: PageLocation,
    state: Mutex<MemoryState>,
    cookies: Arc<Mutex<CookieJar>>,
}

impl MemoryPage {
    /// Creates an empty page loaded from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `url` is not absolute.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Ok(Self {
            location: PageLocation::from_url(&url),
            state: Mutex::new(MemoryState::default()),
            cookies: Arc::new(Mutex::new(CookieJar::default())),
        })
    }

    /// Creates another page sharing this page's cookie jar but with its own
    /// elements and local record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if `url` is not absolute.
    pub fn sibling(&self, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Ok(Self {
            location: PageLocation::from_url(&url),
            state: Mutex::new(MemoryState::default()),
            cookies: Arc::clone(&self.cookies),
        })
    }
}

// ============================================================================
// MemoryPage - Inspection
// ============================================================================

impl MemoryPage {
    /// Returns the number of attached elements.
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.state.lock().elements.len()
    }

    /// Returns `true` if the element is still attached.
    #[must_use]
    pub fn is_attached(&self, element: ElementHandle) -> bool {
        self.state.lock().elements.contains_key(&element)
    }

    /// Returns the sources of attached code-loading elements.
    #[must_use]
    pub fn scripts(&self) -> Vec<Url> {
        self.state
            .lock()
            .elements
            .values()
            .filter_map(|el| match el {
                MemoryElement::Script { src } => Some(src.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the names of attached frames.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameName> {
        self.state
            .lock()
            .elements
            .values()
            .filter_map(|el| match el {
                MemoryElement::Frame { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of attached forms.
    #[must_use]
    pub fn form_count(&self) -> usize {
        self.state
            .lock()
            .elements
            .values()
            .filter(|el| matches!(el, MemoryElement::Form { .. }))
            .count()
    }

    /// Returns every form submitted so far, in submission order.
    #[must_use]
    pub fn submissions(&self) -> Vec<FormSpec> {
        self.state.lock().submissions.clone()
    }

    /// Returns the currently installed global callbacks.
    #[must_use]
    pub fn callbacks(&self) -> Vec<CorrelationId> {
        self.state.lock().callbacks.iter().cloned().collect()
    }

    /// Makes subsequent code-loading elements fail to attach.
    pub fn fail_scripts(&self, fail: bool) {
        self.state.lock().fail_scripts = fail;
    }

    /// Makes subsequent frames fail to attach.
    pub fn fail_frames(&self, fail: bool) {
        self.state.lock().fail_frames = fail;
    }

    /// Makes subsequent form submissions fail.
    pub fn fail_submit(&self, fail: bool) {
        self.state.lock().fail_submit = fail;
    }
}

// ============================================================================
// Page Implementation
// ============================================================================

impl Page for MemoryPage {
    fn location(&self) -> PageLocation {
        self.location.clone()
    }

    fn install_callback(&self, name: &CorrelationId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.callbacks.insert(name.clone()) {
            return Err(Error::protocol(format!("callback {name} already defined")));
        }
        trace!(callback = %name, "Callback installed");
        Ok(())
    }

    fn remove_callback(&self, name: &CorrelationId) {
        self.state.lock().callbacks.remove(name);
    }

    fn inject_script(&self, src: &Url) -> Result<ElementHandle> {
        let mut state = self.state.lock();
        if state.fail_scripts {
            return Err(Error::transport_load(
                CorrelationId::from("script"),
                "script element rejected",
            ));
        }
        let handle = ElementHandle::next();
        state
            .elements
            .insert(handle, MemoryElement::Script { src: src.clone() });
        Ok(handle)
    }

    fn create_frame(&self, name: &FrameName) -> Result<ElementHandle> {
        let mut state = self.state.lock();
        if state.fail_frames {
            return Err(Error::transport_load(
                CorrelationId::from(name.as_str()),
                "frame rejected",
            ));
        }
        let handle = ElementHandle::next();
        state
            .elements
            .insert(handle, MemoryElement::Frame { name: name.clone() });
        Ok(handle)
    }

    fn create_form(&self, form: &FormSpec) -> Result<ElementHandle> {
        let handle = ElementHandle::next();
        self.state.lock().elements.insert(
            handle,
            MemoryElement::Form {
                form: form.clone(),
                submitted: false,
            },
        );
        Ok(handle)
    }

    fn submit_form(&self, element: ElementHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_submit {
            return Err(Error::protocol("form submission blocked"));
        }
        let form = match state.elements.get_mut(&element) {
            Some(MemoryElement::Form { form, submitted }) => {
                *submitted = true;
                form.clone()
            }
            _ => return Err(Error::protocol(format!("{element} is not an attached form"))),
        };
        state.submissions.push(form);
        Ok(())
    }

    fn remove_element(&self, element: ElementHandle) {
        self.state.lock().elements.remove(&element);
    }

    fn get_cookie(&self, name: &str) -> Option<Cookie> {
        let host = &self.location.hostname;
        self.cookies
            .lock()
            .iter()
            .find(|((n, domain), _)| n == name && domain_matches(host, domain))
            .map(|(_, cookie)| cookie.clone())
    }

    fn set_cookie(&self, cookie: Cookie) -> Result<()> {
        let domain = cookie
            .domain
            .clone()
            .unwrap_or_else(|| self.location.hostname.clone());
        if !domain_matches(&self.location.hostname, &domain) {
            return Err(Error::storage(format!(
                "cookie domain {domain} not allowed on {}",
                self.location.hostname
            )));
        }
        self.cookies
            .lock()
            .insert((cookie.name.clone(), domain), cookie);
        Ok(())
    }

    fn delete_cookie(&self, name: &str, domain: Option<&str>) {
        let domain = domain.unwrap_or(&self.location.hostname).to_string();
        self.cookies.lock().remove(&(name.to_string(), domain));
    }

    fn storage_get(&self, key: &str) -> Option<String> {
        self.state.lock().storage.get(key).cloned()
    }

    fn storage_set(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .storage
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn storage_remove(&self, key: &str) {
        self.state.lock().storage.remove(key);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Cookie domain matching: `.example.com` covers the apex and every
/// subdomain; a bare domain is host-only.
fn domain_matches(host: &str, domain: &str) -> bool {
    match domain.strip_prefix('.') {
        Some(parent) => host == parent || host.ends_with(&format!(".{parent}")),
        None => host == domain,
    }
}

// ============================================================================
// Tests
// ============================================================================
