//! Origin allow-list and reply-target origin policy.
//!
//! Two separate decisions live here:
//!
//! - [`OriginAllowList`] decides which incoming messages may settle a call.
//! - [`OriginPolicy`] decides the origin hint sent with every command, which
//!   the remote endpoint uses as the target origin of its reply.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::page::PageLocation;

// ============================================================================
// Constants
// ============================================================================

/// Wildcard target origin.
pub const WILDCARD_ORIGIN: &str = "*";

/// Origins Google Apps Script web apps reply from.
pub const APPS_SCRIPT_ORIGINS: &[&str] = &[
    "https://script.google.com",
    "https://script.googleusercontent.com",
    "https://*.googleusercontent.com",
];

/// Hosts for which [`OriginPolicy::Auto`] sends the page origin by default.
pub const DEFAULT_TRUSTED_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

// ============================================================================
// OriginAllowList
// ============================================================================

/// Origins whose messages may settle a pending command.
///
/// Entries are exact origins (`https://script.google.com`) or wildcard
/// subdomain patterns (`https://*.googleusercontent.com`). The opaque origin
/// `null` is accepted only when the page itself was opened from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginAllowList(Vec<String>);

impl OriginAllowList {
    /// Creates an allow-list from patterns.
    #[must_use]
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    /// Adds a pattern.
    pub fn push(&mut self, pattern: impl Into<String>) {
        self.0.push(pattern.into());
    }

    /// Returns the configured patterns.
    #[inline]
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if a message from `origin` may be routed to settlement.
    #[must_use]
    pub fn allows(&self, origin: &str, page: &PageLocation) -> bool {
        if origin == "null" {
            return page.is_file();
        }
        self.0.iter().any(|pattern| origin_matches(pattern, origin))
    }
}

fn origin_matches(pattern: &str, origin: &str) -> bool {
    match pattern.split_once("*.") {
        Some((scheme, suffix)) => {
            origin
                .strip_prefix(scheme)
                .and_then(|host| host.strip_suffix(suffix))
                .is_some_and(|label| label.len() > 1 && label.ends_with('.'))
        }
        None => pattern == origin,
    }
}

// ============================================================================
// OriginPolicy
// ============================================================================

/// Strictness level of the origin hint sent with commands.
///
/// The remote endpoint addresses its reply to this origin. A wildcard lets
/// any embedding page receive the reply, which weakens the origin check but
/// is the only option when the page origin cannot be trusted to match, for
/// example inside preview sandboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum OriginPolicy {
    /// Always send the page origin.
    Strict,
    /// Always send `*`.
    Wildcard,
    /// Send the page origin on trusted hosts, `*` elsewhere.
    Auto {
        /// Host names or `*.domain` patterns considered trusted.
        #[serde(rename = "trustedHosts")]
        trusted_hosts: Vec<String>,
    },
    /// Send a fixed origin.
    Fixed {
        /// The origin to send.
        origin: String,
    },
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::Auto {
            trusted_hosts: DEFAULT_TRUSTED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl OriginPolicy {
    /// Resolves the origin hint for a page.
    #[must_use]
    pub fn target_origin(&self, page: &PageLocation) -> String {
        match self {
            Self::Strict => page.origin.clone(),
            Self::Wildcard => WILDCARD_ORIGIN.to_string(),
            Self::Fixed { origin } => origin.clone(),
            Self::Auto { trusted_hosts } => {
                let trusted = !page.is_file()
                    && trusted_hosts
                        .iter()
                        .any(|pattern| host_matches(pattern, &page.hostname));
                if trusted {
                    page.origin.clone()
                } else {
                    WILDCARD_ORIGIN.to_string()
                }
            }
        }
    }

    /// Returns `true` if this policy may ever send a wildcard.
    #[inline]
    #[must_use]
    pub fn may_use_wildcard(&self) -> bool {
        match self {
            Self::Strict => false,
            Self::Wildcard | Self::Auto { .. } => true,
            Self::Fixed { origin } => origin == WILDCARD_ORIGIN,
        }
    }
}

/// `example.com` matches exactly; `*.example.com` matches the apex and every
/// subdomain.
fn host_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(domain) => host == domain || host.ends_with(&format!(".{domain}")),
        None => host == pattern,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use url::Url;

    fn page(url: &str) -> PageLocation {
        PageLocation::from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_allow_list_exact_and_wildcard() {
        let list = OriginAllowList::new(APPS_SCRIPT_ORIGINS.iter().copied());
        let shop = page("https://shop.example.com/");

        assert!(list.allows("https://script.google.com", &shop));
        assert!(list.allows("https://n-abc123-0lu-script.googleusercontent.com", &shop));
        assert!(!list.allows("https://googleusercontent.com", &shop));
        assert!(!list.allows("https://evil-googleusercontent.com", &shop));
        assert!(!list.allows("http://x.googleusercontent.com", &shop));
        assert!(!list.allows("https://attacker.example", &shop));
    }

    #[test]
    fn test_null_origin_only_for_file_pages() {
        let list = OriginAllowList::default();
        assert!(list.allows("null", &page("file:///tmp/index.html")));
        assert!(!list.allows("null", &page("https://shop.example.com/")));
    }

    #[test]
    fn test_strict_policy() {
        let shop = page("https://shop.example.com/p/1");
        assert_eq!(
            OriginPolicy::Strict.target_origin(&shop),
            "https://shop.example.com"
        );
        assert!(!OriginPolicy::Strict.may_use_wildcard());
    }

    #[test]
    fn test_auto_policy_trusted_and_untrusted() {
        let policy = OriginPolicy::Auto {
            trusted_hosts: vec!["*.example.com".into(), "localhost".into()],
        };

        assert_eq!(
            policy.target_origin(&page("https://shop.example.com/")),
            "https://shop.example.com"
        );
        assert_eq!(
            policy.target_origin(&page("https://example.com/")),
            "https://example.com"
        );
        assert_eq!(
            policy.target_origin(&page("http://localhost:8080/")),
            "http://localhost:8080"
        );
        assert_eq!(
            policy.target_origin(&page("https://preview.sandbox.dev/")),
            "*"
        );
        assert_eq!(policy.target_origin(&page("file:///tmp/a.html")), "*");
    }

    #[test]
    fn test_fixed_and_wildcard_policy() {
        let shop = page("https://shop.example.com/");
        let fixed = OriginPolicy::Fixed {
            origin: "https://a.example".into(),
        };
        assert_eq!(fixed.target_origin(&shop), "https://a.example");
        assert!(!fixed.may_use_wildcard());
        assert_eq!(OriginPolicy::Wildcard.target_origin(&shop), "*");
    }

    #[test]
    fn test_policy_deserialize() {
        let policy: OriginPolicy =
            serde_json::from_str(r#"{"mode":"auto","trustedHosts":["*.shop.io"]}"#).unwrap();
        assert_eq!(
            policy,
            OriginPolicy::Auto {
                trusted_hosts: vec!["*.shop.io".into()]
            }
        );
        let strict: OriginPolicy = serde_json::from_str(r#"{"mode":"strict"}"#).unwrap();
        assert_eq!(strict, OriginPolicy::Strict);
    }
}
