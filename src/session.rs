//! Session persistence.
//!
//! The token and a small session record survive reloads through the page's
//! durable local record. The token is mirrored into a cookie scoped to the
//! shared parent domain so sibling subdomains read the same value.
//!
//! Every session write also writes a change marker. Other tabs watch that
//! key (storage events or polling) to know they must re-render account
//! state; in-process observers use [`SessionStore::subscribe`].

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::page::{Cookie, Page};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the in-process change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// SessionRecord
// ============================================================================

/// Persisted authentication state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Auth token.
    pub token: String,
    /// User information returned by the endpoint.
    #[serde(default)]
    pub profile: Value,
    /// Last write, milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl SessionRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(token: impl Into<String>, profile: Value) -> Self {
        Self {
            token: token.into(),
            profile,
            updated_at: now_millis(),
        }
    }
}

// ============================================================================
// SessionChange
// ============================================================================

/// Notification that the session changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    /// The new change marker; `None` if the marker was removed.
    pub marker: Option<String>,
    /// `true` if the change was made by this store, `false` for other tabs.
    pub local: bool,
}

// ============================================================================
// SessionStore
// ============================================================================

/// Token and session record storage.
///
/// All reads and writes are synchronous page calls.
pub struct SessionStore {
    page: Arc<dyn Page>,
    config: SessionConfig,
    changes: broadcast::Sender<SessionChange>,
}

impl SessionStore {
    /// Creates a store on `page`.
    #[must_use]
    pub fn new(page: Arc<dyn Page>, config: SessionConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            page,
            config,
            changes,
        }
    }

    /// Returns the token.
    ///
    /// When the cookie is scoped to a parent domain it is authoritative:
    /// the local record follows it, and a missing cookie means another
    /// subdomain logged out, so stale local state is dropped. Host-only
    /// setups read the local record.
    #[must_use]
    pub fn get_token(&self) -> Option<String> {
        let local = self
            .page
            .storage_get(&self.config.token_key)
            .filter(|t| !t.is_empty());

        if self.cookie_domain().is_none() {
            return local;
        }

        let Some(token) = self.shared_token() else {
            if local.is_some() {
                debug!("Session cookie gone, dropping local session");
            }
            self.page.storage_remove(&self.config.token_key);
            self.page.storage_remove(&self.config.session_key);
            return None;
        };

        if local.as_deref() != Some(token.as_str())
            && let Err(e) = self.page.storage_set(&self.config.token_key, &token)
        {
            warn!(error = %e, "Failed to sync token from cookie");
        }
        Some(token)
    }

    /// Stores the token locally and in the parent-domain cookie.
    ///
    /// If a session record exists its token is refreshed too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) if either write
    /// fails.
    pub fn set_token(&self, token: &str) -> Result<()> {
        self.write_token(token)?;

        if let Some(mut record) = self.read_record()
            && record.token != token
        {
            record.token = token.to_string();
            record.updated_at = now_millis();
            self.write_record(&record)?;
            self.bump_marker()?;
        }
        Ok(())
    }

    /// Returns the session record.
    ///
    /// An unreadable record is treated as absent.
    ///
    /// With a parent-domain cookie the record carries the cookie's token,
    /// and no record is returned once the cookie is gone.
    #[must_use]
    pub fn get_session(&self) -> Option<SessionRecord> {
        let mut record = self.read_record()?;
        if self.cookie_domain().is_some() {
            let token = self.get_token()?;
            record.token = token;
        }
        Some(record)
    }

    /// Stores the session record, mirrors its token and notifies other tabs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) if a write fails.
    pub fn set_session(&self, record: &SessionRecord) -> Result<()> {
        self.write_record(record)?;
        self.write_token(&record.token)?;
        self.bump_marker()?;
        debug!(updated_at = record.updated_at, "Session stored");
        Ok(())
    }

    /// Removes the token, the record and the cookie, and notifies other tabs.
    pub fn clear(&self) {
        self.page.storage_remove(&self.config.token_key);
        self.page.storage_remove(&self.config.session_key);
        self.page
            .delete_cookie(&self.config.cookie_name, self.cookie_domain().as_deref());

        if let Err(e) = self.bump_marker() {
            warn!(error = %e, "Failed to write session change marker");
        }
        debug!("Session cleared");
    }

    /// Returns the current change marker.
    ///
    /// Pollers compare it with the last value they saw.
    #[must_use]
    pub fn change_marker(&self) -> Option<String> {
        self.page.storage_get(&self.config.marker_key)
    }

    /// Subscribes to session changes, local and from other tabs.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    /// Handles a storage event from another tab.
    ///
    /// Returns `true` if the key was the change marker.
    pub fn handle_storage_event(&self, key: &str, new_value: Option<&str>) -> bool {
        if key != self.config.marker_key {
            return false;
        }
        debug!(marker = ?new_value, "Session changed in another tab");
        let _ = self.changes.send(SessionChange {
            marker: new_value.map(str::to_string),
            local: false,
        });
        true
    }

    /// Returns the cookie domain: configured, or the parent of the page host.
    ///
    /// `None` means a host-only cookie (IP addresses, single-label hosts).
    #[must_use]
    pub fn cookie_domain(&self) -> Option<String> {
        if let Some(domain) = &self.config.cookie_domain {
            return Some(domain.clone());
        }
        parent_domain(&self.page.location().hostname)
    }

    fn write_token(&self, token: &str) -> Result<()> {
        self.page.storage_set(&self.config.token_key, token)?;

        let location = self.page.location();
        let mut cookie = Cookie::new(&self.config.cookie_name, token)
            .with_path("/")
            .with_max_age(self.config.cookie_max_age_secs)
            .with_same_site("Lax")
            .with_secure(location.is_secure());
        if let Some(domain) = self.cookie_domain() {
            cookie = cookie.with_domain(domain);
        }
        self.page.set_cookie(cookie)
    }

    fn shared_token(&self) -> Option<String> {
        self.page
            .get_cookie(&self.config.cookie_name)
            .map(|cookie| cookie.value)
            .filter(|t| !t.is_empty())
    }

    fn read_record(&self) -> Option<SessionRecord> {
        let raw = self.page.storage_get(&self.config.session_key)?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session record");
                None
            }
        }
    }

    fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.page.storage_set(&self.config.session_key, &raw)
    }

    fn bump_marker(&self) -> Result<()> {
        let marker = format!("{}-{}", now_millis(), &Uuid::new_v4().simple().to_string()[..8]);
        self.page.storage_set(&self.config.marker_key, &marker)?;
        let _ = self.changes.send(SessionChange {
            marker: Some(marker),
            local: true,
        });
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// `.example.com` for `shop.example.com` and `example.com`.
///
/// Takes the last two labels; multi-label public suffixes such as `co.uk`
/// need an explicit cookie domain.
fn parent_domain(host: &str) -> Option<String> {
    if host.is_empty() || host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    Some(format!(".{}", labels[labels.len() - 2..].join(".")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::page::MemoryPage;

    fn store(page: &Arc<MemoryPage>) -> SessionStore {
        SessionStore::new(page.clone(), SessionConfig::default())
    }

    #[test]
    fn test_parent_domain() {
        assert_eq!(parent_domain("shop.example.com").as_deref(), Some(".example.com"));
        assert_eq!(parent_domain("example.com").as_deref(), Some(".example.com"));
        assert_eq!(parent_domain("a.b.example.com").as_deref(), Some(".example.com"));
        assert_eq!(parent_domain("localhost"), None);
        assert_eq!(parent_domain("127.0.0.1"), None);
        assert_eq!(parent_domain("[::1]"), None);
        assert_eq!(parent_domain(""), None);
    }

    #[test]
    fn test_set_token_writes_local_and_cookie() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let store = store(&page);

        store.set_token("abc").unwrap();

        assert_eq!(store.get_token().as_deref(), Some("abc"));
        let cookie = page.get_cookie("nocors_token").unwrap();
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain.as_deref(), Some(".example.com"));
        assert_eq!(cookie.secure, Some(true));
    }

    #[test]
    fn test_sibling_subdomain_reads_cookie() {
        let shop = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let account = Arc::new(shop.sibling("https://account.example.com/").unwrap());

        store(&shop).set_token("abc").unwrap();

        let sibling = store(&account);
        assert_eq!(sibling.get_token().as_deref(), Some("abc"));
        assert_eq!(account.storage_get("nocors_token").as_deref(), Some("abc"));
    }

    #[test]
    fn test_sibling_follows_refresh_and_logout() {
        let shop = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let account = Arc::new(shop.sibling("https://account.example.com/").unwrap());
        let shop_store = store(&shop);
        let account_store = store(&account);

        shop_store
            .set_session(&SessionRecord::new("abc", json!({ "email": "a@b.com" })))
            .unwrap();
        assert_eq!(account_store.get_token().as_deref(), Some("abc"));
        account_store
            .set_session(&SessionRecord::new("abc", json!({ "email": "a@b.com" })))
            .unwrap();

        shop_store.set_token("def").unwrap();
        assert_eq!(account_store.get_token().as_deref(), Some("def"));
        assert_eq!(account.storage_get("nocors_token").as_deref(), Some("def"));
        assert_eq!(account_store.get_session().unwrap().token, "def");

        shop_store.clear();
        assert_eq!(account_store.get_token(), None);
        assert_eq!(account_store.get_session(), None);
        assert!(account.storage_get("nocors_token").is_none());
        assert!(account.storage_get("nocors_session").is_none());
    }

    #[test]
    fn test_host_only_session_stays_local() {
        let page = Arc::new(MemoryPage::new("http://localhost:4000/").unwrap());
        let store = store(&page);
        store
            .set_session(&SessionRecord::new("t", json!({})))
            .unwrap();

        page.delete_cookie("nocors_token", None);
        assert_eq!(store.get_token().as_deref(), Some("t"));
        assert_eq!(store.get_session().unwrap().token, "t");
    }

    #[test]
    fn test_localhost_uses_host_only_cookie() {
        let page = Arc::new(MemoryPage::new("http://localhost:4000/").unwrap());
        let store = store(&page);
        store.set_token("t").unwrap();

        let cookie = page.get_cookie("nocors_token").unwrap();
        assert_eq!(cookie.domain, None);
        assert_eq!(cookie.secure, Some(false));
    }

    #[test]
    fn test_session_round_trip_and_marker() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let store = store(&page);
        assert!(store.change_marker().is_none());

        let record = SessionRecord::new("abc", json!({ "email": "a@b.com" }));
        store.set_session(&record).unwrap();

        assert_eq!(store.get_session(), Some(record));
        assert_eq!(store.get_token().as_deref(), Some("abc"));
        assert!(store.change_marker().is_some());
    }

    #[test]
    fn test_token_refresh_updates_record() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let store = store(&page);
        store
            .set_session(&SessionRecord::new("old", json!({})))
            .unwrap();
        let marker = store.change_marker();

        store.set_token("new").unwrap();

        assert_eq!(store.get_session().unwrap().token, "new");
        assert_ne!(store.change_marker(), marker);
    }

    #[test]
    fn test_clear_removes_everything() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let store = store(&page);
        store
            .set_session(&SessionRecord::new("abc", json!({})))
            .unwrap();
        let marker = store.change_marker();

        store.clear();

        assert!(store.get_token().is_none());
        assert!(store.get_session().is_none());
        assert!(page.get_cookie("nocors_token").is_none());
        assert_ne!(store.change_marker(), marker);
    }

    #[test]
    fn test_corrupt_record_is_absent() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        page.storage_set("nocors_session", "{not json").unwrap();
        assert!(store(&page).get_session().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_local_and_remote_changes() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let store = store(&page);
        let mut changes = store.subscribe();

        store
            .set_session(&SessionRecord::new("abc", json!({})))
            .unwrap();
        let local = changes.recv().await.unwrap();
        assert!(local.local);
        assert_eq!(local.marker, store.change_marker());

        assert!(!store.handle_storage_event("unrelated", Some("x")));
        assert!(store.handle_storage_event("nocors_session_changed", Some("42-remote")));
        let remote = changes.recv().await.unwrap();
        assert!(!remote.local);
        assert_eq!(remote.marker.as_deref(), Some("42-remote"));
    }
}
