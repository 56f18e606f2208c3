//! Page-wide cross-window message listener.
//!
//! Every message the page receives passes through here. Only replies from an
//! allowed origin, naming a pending correlation id, and (when the glue
//! reports the sender) coming from that call's own frame reach settlement.
//! Everything else is noise and is dropped without touching any call.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::{FieldPrecedence, OriginAllowList};
use crate::page::Page;
use crate::protocol::{MessageEvent, ResultMessage};
use crate::registry::RequestRegistry;

use super::Endpoint;

// ============================================================================
// MessageOutcome
// ============================================================================

/// What the listener did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A pending command was settled with the reply.
    Settled,
    /// A pending command was rejected because the reply was malformed.
    Malformed,
    /// The sender origin is not allowed.
    DisallowedOrigin,
    /// The payload is not a reply object.
    NotAReply,
    /// The correlation id is not pending.
    UnknownRequest,
    /// The reply came from a frame other than the call's own.
    WrongSource,
}

impl MessageOutcome {
    /// Returns `true` if a pending call was settled.
    #[inline]
    #[must_use]
    pub fn settled(&self) -> bool {
        matches!(self, Self::Settled | Self::Malformed)
    }
}

// ============================================================================
// MessageListener
// ============================================================================

/// Filters incoming messages and forwards replies to the command registry.
#[derive(Clone)]
pub struct MessageListener {
    page: Arc<dyn Page>,
    endpoint: Endpoint,
    allowed: OriginAllowList,
    fields: Arc<FieldPrecedence>,
    registry: RequestRegistry<ResultMessage>,
}

impl MessageListener {
    /// Creates a listener settling calls in `registry`.
    #[must_use]
    pub fn new(
        page: Arc<dyn Page>,
        endpoint: Endpoint,
        allowed: OriginAllowList,
        fields: Arc<FieldPrecedence>,
        registry: RequestRegistry<ResultMessage>,
    ) -> Self {
        Self {
            page,
            endpoint,
            allowed,
            fields,
            registry,
        }
    }

    /// Returns `true` if messages from `origin` may settle a call.
    ///
    /// The endpoint's own origin is always allowed.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed.allows(origin, &self.page.location())
            || self.endpoint.origin().is_some_and(|own| own == origin)
    }

    /// Handles one message.
    pub fn handle(&self, event: &MessageEvent) -> MessageOutcome {
        if !self.origin_allowed(&event.origin) {
            trace!(origin = %event.origin, "Message from disallowed origin dropped");
            return MessageOutcome::DisallowedOrigin;
        }

        let Some(object) = event.object() else {
            trace!(origin = %event.origin, "Non-reply message dropped");
            return MessageOutcome::NotAReply;
        };

        let Some(id) = ResultMessage::correlation_id_of(&object, &self.fields) else {
            trace!(origin = %event.origin, "Message without request id dropped");
            return MessageOutcome::NotAReply;
        };

        let Some(frame) = self.registry.owning_frame(&id) else {
            debug!(request_id = %id, "Reply for unknown request ignored");
            return MessageOutcome::UnknownRequest;
        };

        if let (Some(expected), Some(source)) = (&frame, &event.source)
            && expected != source
        {
            warn!(request_id = %id, source = %source, "Reply from foreign frame dropped");
            return MessageOutcome::WrongSource;
        }

        match ResultMessage::from_object(object, &self.fields) {
            Ok(reply) => {
                debug!(request_id = %id, ok = reply.ok, "Reply received");
                self.registry.settle(&id, reply.into_result(&self.fields));
                MessageOutcome::Settled
            }
            Err(e) => {
                warn!(request_id = %id, error = %e, "Malformed reply");
                self.registry.settle(&id, Err(e));
                MessageOutcome::Malformed
            }
        }
    }
}
