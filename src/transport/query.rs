//! Script-element transport for read-only calls.
//!
//! Each query installs a uniquely named global callback, injects a script
//! element whose address carries the action, the callback name and the
//! parameters, and waits for the loaded script to invoke the callback.
//! The callback name is the call's correlation id, so the callback and the
//! element are owned by the registry entry and torn down with it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::page::Page;
use crate::protocol::{parse_script_body, query_url};
use crate::registry::{PendingCall, RequestRegistry, TransportResources};

use super::Endpoint;

// ============================================================================
// QueryTransport
// ============================================================================

/// Issues read-only calls through dynamically loaded scripts.
#[derive(Clone)]
pub struct QueryTransport {
    page: Arc<dyn Page>,
    endpoint: Endpoint,
    registry: RequestRegistry<Value>,
    timeout: Duration,
}

impl QueryTransport {
    /// Creates a transport on `page`.
    #[must_use]
    pub fn new(page: Arc<dyn Page>, endpoint: Endpoint, config: &BridgeConfig) -> Self {
        Self {
            page,
            endpoint,
            registry: RequestRegistry::new("query", config.max_pending),
            timeout: config.timeout(),
        }
    }

    /// Runs a query and waits for its payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint is configured
    /// - [`Error::TransportLoad`] if the script fails to load
    /// - [`Error::Timeout`] if the callback is not invoked in time
    /// - [`Error::Protocol`] if the response body is malformed
    pub async fn query(&self, action: &str, params: &Map<String, Value>) -> Result<Value> {
        self.dispatch(action, params)?.await
    }

    /// Starts a query and returns the future of its payload.
    ///
    /// The call is registered before the script element is injected.
    ///
    /// # Errors
    ///
    /// Fails before any network side effect if the endpoint is missing, the
    /// callback cannot be installed, or the pending cap is reached.
    pub fn dispatch(&self, action: &str, params: &Map<String, Value>) -> Result<PendingCall<Value>> {
        let endpoint = self.endpoint.url()?;
        let id = CorrelationId::callback();
        let src = query_url(&endpoint, action, &id, params);

        let mut resources = TransportResources::new(Arc::clone(&self.page));
        self.page.install_callback(&id)?;
        resources.track_callback(id.clone());

        let call = self.registry.register(id.clone(), resources, self.timeout)?;

        match self.page.inject_script(&src) {
            Ok(element) => {
                self.registry
                    .track_element(&id, self.page.as_ref(), element);
                debug!(request_id = %id, action, "Query dispatched");
            }
            Err(e) => {
                self.registry
                    .settle(&id, Err(Error::transport_load(id.clone(), e.to_string())));
            }
        }

        Ok(call)
    }

    /// Handles the text of a loaded script.
    ///
    /// Returns `false` if the callback is no longer pending.
    pub fn handle_script_response(&self, callback: &CorrelationId, body: &str) -> bool {
        if !callback.is_callback() {
            trace!(request_id = %callback, "Script response for non-callback id ignored");
            return false;
        }
        if !self.registry.contains(callback) {
            debug!(request_id = %callback, "Script response for settled query ignored");
            return false;
        }
        self.registry
            .settle(callback, parse_script_body(body, callback))
    }

    /// Handles a direct invocation of the global callback.
    pub fn invoke_callback(&self, callback: &CorrelationId, payload: Value) -> bool {
        self.registry.settle(callback, Ok(payload))
    }

    /// Handles a script element load failure.
    pub fn handle_script_error(&self, callback: &CorrelationId) -> bool {
        self.registry.settle(
            callback,
            Err(Error::transport_load(
                callback.clone(),
                "script failed to load",
            )),
        )
    }

    /// Returns the underlying registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &RequestRegistry<Value> {
        &self.registry
    }

    /// Returns the number of queries in flight.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
