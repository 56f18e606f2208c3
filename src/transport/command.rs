//! Hidden form + invisible frame transport for state-changing calls.
//!
//! # Flow
//!
//! 1. Mint a correlation id
//! 2. Append an invisible frame named after the id
//! 3. Append a hidden POST form targeting that frame
//! 4. Register the call (timer starts)
//! 5. Submit the form; the frame navigates to the endpoint
//! 6. The endpoint's reply document posts a message to this window
//! 7. [`MessageListener`] settles the call; frame and form are removed
//!
//! No retry happens here: a call without a reply before its deadline fails
//! with [`Error::Timeout`](crate::Error::Timeout).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{BridgeConfig, FieldPrecedence, OriginPolicy};
use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, FrameName};
use crate::page::Page;
use crate::protocol::{CommandRequest, MessageEvent, ResultMessage};
use crate::registry::{PendingCall, RequestRegistry, TransportResources};

use super::{Endpoint, MessageListener, MessageOutcome};

// ============================================================================
// CommandTransport
// ============================================================================

/// Issues state-changing calls through disposable invisible frames.
#[derive(Clone)]
pub struct CommandTransport {
    page: Arc<dyn Page>,
    endpoint: Endpoint,
    registry: RequestRegistry<ResultMessage>,
    listener: MessageListener,
    origin_policy: OriginPolicy,
    timeout: Duration,
}

impl CommandTransport {
    /// Creates a transport and its message listener on `page`.
    #[must_use]
    pub fn new(
        page: Arc<dyn Page>,
        endpoint: Endpoint,
        config: &BridgeConfig,
        fields: Arc<FieldPrecedence>,
    ) -> Self {
        let registry = RequestRegistry::new("command", config.max_pending);
        let listener = MessageListener::new(
            Arc::clone(&page),
            endpoint.clone(),
            config.allowed_origins.clone(),
            fields,
            registry.clone(),
        );

        let origin_policy = config.effective_origin_policy();
        if origin_policy.may_use_wildcard() {
            warn!(policy = ?origin_policy, "Replies may be addressed to any origin");
        }

        Self {
            page,
            endpoint,
            registry,
            listener,
            origin_policy,
            timeout: config.timeout(),
        }
    }

    /// Runs a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint is configured
    /// - [`Error::TransportLoad`] if the frame or form cannot be used
    /// - [`Error::Timeout`] if no reply arrives in time
    /// - [`Error::Protocol`] if the reply is malformed
    /// - [`Error::Application`] if the reply has `ok: false`
    pub async fn command(&self, action: &str, payload: &Map<String, Value>) -> Result<ResultMessage> {
        self.dispatch(action, payload)?.await
    }

    /// Starts a command and returns the future of its reply.
    ///
    /// The call is registered before the form is submitted.
    ///
    /// # Errors
    ///
    /// Fails before any network side effect if the endpoint is missing, the
    /// frame or form cannot be created, or the pending cap is reached.
    pub fn dispatch(
        &self,
        action: &str,
        payload: &Map<String, Value>,
    ) -> Result<PendingCall<ResultMessage>> {
        let endpoint = self.endpoint.url()?;
        let id = CorrelationId::request();
        let frame = FrameName::for_request(&id);
        let origin = self.origin_policy.target_origin(&self.page.location());

        let mut resources = TransportResources::new(Arc::clone(&self.page));

        let frame_element = self
            .page
            .create_frame(&frame)
            .map_err(|e| Error::transport_load(id.clone(), e.to_string()))?;
        resources.track_frame(frame.clone(), frame_element);

        let form = CommandRequest {
            id: &id,
            action,
            origin: &origin,
            payload,
        }
        .to_form(&endpoint, frame);
        let form_element = self
            .page
            .create_form(&form)
            .map_err(|e| Error::transport_load(id.clone(), e.to_string()))?;
        resources.track_element(form_element);

        let call = self.registry.register(id.clone(), resources, self.timeout)?;

        match self.page.submit_form(form_element) {
            Ok(()) => debug!(request_id = %id, action, origin = %origin, "Command dispatched"),
            Err(e) => {
                self.registry
                    .settle(&id, Err(Error::transport_load(id.clone(), e.to_string())));
            }
        }

        Ok(call)
    }

    /// Handles one cross-window message.
    #[inline]
    pub fn handle_message(&self, event: &MessageEvent) -> MessageOutcome {
        self.listener.handle(event)
    }

    /// Handles a frame navigation failure.
    pub fn handle_frame_error(&self, id: &CorrelationId) -> bool {
        self.registry.settle(
            id,
            Err(Error::transport_load(id.clone(), "frame failed to load")),
        )
    }

    /// Returns the message listener.
    #[inline]
    #[must_use]
    pub fn listener(&self) -> &MessageListener {
        &self.listener
    }

    /// Returns the underlying registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &RequestRegistry<ResultMessage> {
        &self.registry
    }

    /// Returns the number of commands in flight.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
