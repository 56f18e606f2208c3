//! In-flight call table.
//!
//! The registry owns every [`PendingRequest`] from dispatch until settlement.
//! Each entry carries the caller's result channel, the per-request timer and
//! the transient page resources of the call.
//!
//! # Settlement
//!
//! Every exit path (reply, load failure, timeout, dispose) goes through one
//! removal from the table. Whoever removes the entry settles it; everybody
//! else finds nothing and does nothing. This gives:
//!
//! - at most one live entry per [`CorrelationId`]
//! - exactly one settlement per call
//! - exactly one release of its [`TransportResources`]
//!
//! Settling an unknown id is a no-op, so duplicate, late or foreign replies
//! are harmless.
//!
//! # Timers
//!
//! [`register`](RequestRegistry::register) spawns a tokio sleep per call and
//! keeps its abort handle in the entry. Hosts that drive time themselves can
//! also call [`expire_overdue`](RequestRegistry::expire_overdue).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, ElementHandle, FrameName};
use crate::page::Page;

// ============================================================================
// Types
// ============================================================================

/// Table of in-flight calls.
type PendingMap<T> = FxHashMap<CorrelationId, PendingRequest<T>>;

// ============================================================================
// TransportResources
// ============================================================================

/// Transient page objects owned by one call.
///
/// Dropping the value detaches every tracked element and deletes the tracked
/// global callback, so teardown runs on every exit path without being
/// repeated in each branch.
pub struct TransportResources {
    page: Arc<dyn Page>,
    elements: Vec<ElementHandle>,
    callback: Option<CorrelationId>,
    frame: Option<FrameName>,
}

impl TransportResources {
    /// Creates an empty resource set on `page`.
    #[must_use]
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self {
            page,
            elements: Vec::new(),
            callback: None,
            frame: None,
        }
    }

    /// Takes ownership of an attached element.
    pub fn track_element(&mut self, element: ElementHandle) {
        self.elements.push(element);
    }

    /// Takes ownership of an installed global callback.
    pub fn track_callback(&mut self, name: CorrelationId) {
        self.callback = Some(name);
    }

    /// Takes ownership of the invisible frame a reply must come from.
    pub fn track_frame(&mut self, name: FrameName, element: ElementHandle) {
        self.frame = Some(name);
        self.elements.push(element);
    }

    /// Returns the owned frame name, if any.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> Option<&FrameName> {
        self.frame.as_ref()
    }

    /// Returns the number of owned elements.
    #[inline]
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Drop for TransportResources {
    fn drop(&mut self) {
        for element in self.elements.drain(..).rev() {
            self.page.remove_element(element);
        }
        if let Some(callback) = self.callback.take() {
            self.page.remove_callback(&callback);
        }
    }
}

impl fmt::Debug for TransportResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResources")
            .field("elements", &self.elements)
            .field("callback", &self.callback)
            .field("frame", &self.frame)
            .finish()
    }
}

// ============================================================================
// PendingRequest
// ============================================================================

/// One outstanding call.
pub struct PendingRequest<T> {
    id: CorrelationId,
    created_at: Instant,
    deadline: Instant,
    timeout: Duration,
    timer: Option<AbortHandle>,
    resources: TransportResources,
    settle: oneshot::Sender<Result<T>>,
}

impl<T> PendingRequest<T> {
    /// Cancels the timer, releases resources and delivers the result.
    fn finish(self, result: Result<T>) {
        let Self {
            id,
            created_at,
            timer,
            resources,
            settle,
            ..
        } = self;

        if let Some(timer) = timer {
            timer.abort();
        }
        drop(resources);

        let ok = result.is_ok();
        if settle.send(result).is_err() {
            trace!(request_id = %id, "Caller dropped before settlement");
        }

        debug!(
            request_id = %id,
            ok,
            elapsed_ms = created_at.elapsed().as_millis() as u64,
            "Request settled"
        );
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// The future a caller awaits for one dispatched call.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall<T> {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingCall<T> {
    /// Returns the id this call is registered under.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }
}

impl<T> Future for PendingCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(Error::from).and_then(|result| result))
    }
}

impl<T> fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}

// ============================================================================
// RequestRegistry
// ============================================================================

struct RegistryInner<T> {
    label: &'static str,
    max_pending: usize,
    table: Mutex<PendingMap<T>>,
}

impl<T> RegistryInner<T> {
    fn take(&self, id: &CorrelationId) -> Option<PendingRequest<T>> {
        self.table.lock().remove(id)
    }

    fn expire(&self, id: &CorrelationId) {
        if let Some(entry) = self.take(id) {
            let timeout_ms = entry.timeout.as_millis() as u64;
            warn!(kind = self.label, request_id = %id, timeout_ms, "Request timed out");
            entry.finish(Err(Error::timeout(id.clone(), timeout_ms)));
        }
    }
}

impl<T> Drop for RegistryInner<T> {
    fn drop(&mut self) {
        let pending: Vec<_> = self.table.get_mut().drain().collect();
        let count = pending.len();
        for (_, entry) in pending {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
        }
        if count > 0 {
            debug!(kind = self.label, count, "Dropped pending requests");
        }
    }
}

/// Owned table of in-flight calls, keyed by correlation id.
///
/// Cloning yields another handle to the same table.
pub struct RequestRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for RequestRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> RequestRegistry<T> {
    /// Creates an empty registry.
    ///
    /// `label` tags log records; `max_pending` caps concurrent entries.
    #[must_use]
    pub fn new(label: &'static str, max_pending: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                label,
                max_pending,
                table: Mutex::new(PendingMap::default()),
            }),
        }
    }

    /// Registers a call and starts its timer.
    ///
    /// Must be called before the call's network side effect starts. On error
    /// `resources` are released immediately.
    ///
    /// Requires a tokio runtime context.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if `id` is already pending
    /// - [`Error::Protocol`] if the pending cap is reached
    pub fn register(
        &self,
        id: CorrelationId,
        resources: TransportResources,
        timeout: Duration,
    ) -> Result<PendingCall<T>> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let elements = resources.element_count();

        let mut table = self.inner.table.lock();

        if table.contains_key(&id) {
            return Err(Error::protocol(format!("{id} is already pending")));
        }
        if table.len() >= self.inner.max_pending {
            warn!(
                kind = self.inner.label,
                pending = table.len(),
                max = self.inner.max_pending,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {}/{}",
                table.len(),
                self.inner.max_pending
            )));
        }

        // The timer cannot observe the table until the lock is released,
        // so it always finds the entry it was spawned for.
        let timer = spawn_timer(Arc::downgrade(&self.inner), id.clone(), timeout);

        table.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                created_at: now,
                deadline: now + timeout,
                timeout,
                timer: Some(timer),
                resources,
                settle: tx,
            },
        );
        drop(table);

        debug!(
            kind = self.inner.label,
            request_id = %id,
            elements,
            timeout_ms = timeout.as_millis() as u64,
            "Request registered"
        );

        Ok(PendingCall { id, rx })
    }
}

impl<T> RequestRegistry<T> {
    /// Settles a call.
    ///
    /// Returns `false` and does nothing if `id` is not pending.
    pub fn settle(&self, id: &CorrelationId, result: Result<T>) -> bool {
        match self.inner.take(id) {
            Some(entry) => {
                entry.finish(result);
                true
            }
            None => {
                trace!(kind = self.inner.label, request_id = %id, "Settlement for unknown request ignored");
                false
            }
        }
    }

    /// Removes a call without a result.
    ///
    /// Resources are released and the caller's future fails with
    /// [`Error::ChannelClosed`]. Returns `false` if `id` is not pending.
    pub fn dispose(&self, id: &CorrelationId) -> bool {
        match self.inner.take(id) {
            Some(entry) => {
                debug!(kind = self.inner.label, request_id = %id, "Request disposed");
                if let Some(timer) = &entry.timer {
                    timer.abort();
                }
                drop(entry);
                true
            }
            None => false,
        }
    }

    /// Times out every call whose deadline has passed.
    ///
    /// Returns the number of calls expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<_> = {
            let mut table = self.inner.table.lock();
            let ids: Vec<_> = table
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| table.remove(&id))
                .collect()
        };

        let count = overdue.len();
        for entry in overdue {
            let timeout_ms = entry.timeout.as_millis() as u64;
            let id = entry.id.clone();
            warn!(kind = self.inner.label, request_id = %id, timeout_ms, "Request timed out");
            entry.finish(Err(Error::timeout(id, timeout_ms)));
        }
        count
    }

    /// Attaches another element to a pending call.
    ///
    /// If the call already settled, the element is detached immediately and
    /// `false` is returned.
    pub fn track_element(&self, id: &CorrelationId, page: &dyn Page, element: ElementHandle) -> bool {
        let mut table = self.inner.table.lock();
        match table.get_mut(id) {
            Some(entry) => {
                entry.resources.track_element(element);
                true
            }
            None => {
                drop(table);
                page.remove_element(element);
                false
            }
        }
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.inner.table.lock().contains_key(id)
    }

    /// Returns the frame a pending call's reply must come from.
    ///
    /// `None` if the call is not pending; `Some(None)` if it owns no frame.
    #[must_use]
    pub fn owning_frame(&self, id: &CorrelationId) -> Option<Option<FrameName>> {
        self.inner
            .table
            .lock()
            .get(id)
            .map(|entry| entry.resources.frame().cloned())
    }

    /// Returns the number of pending calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }
}

impl<T> fmt::Debug for RequestRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("label", &self.inner.label)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn spawn_timer<T: Send + 'static>(
    registry: Weak<RegistryInner<T>>,
    id: CorrelationId,
    timeout: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        sleep(timeout).await;
        if let Some(inner) = registry.upgrade() {
            inner.expire(&id);
        }
    })
    .abort_handle()
}

// ============================================================================
// Tests
// ============================================================================
