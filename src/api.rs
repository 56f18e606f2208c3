//! Named domain operations.
//!
//! [`Bridge`] routes each read to the [`QueryTransport`] and each write to the
//! [`CommandTransport`], and persists the session after a successful login.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nocors_bridge::{Bridge, BridgeConfig, MemoryPage, Result};
//!
//! # async fn example() -> Result<()> {
//! let page = Arc::new(MemoryPage::new("https://shop.example.com/")?);
//! let config = BridgeConfig::builder()
//!     .endpoint("https://script.google.com/macros/s/ID/exec")
//!     .allow_apps_script_origins()
//!     .build()?;
//!
//! let bridge = Bridge::new(page, config);
//! let products = bridge.get_products(None, None).await?;
//! println!("{} products", products.len());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::config::{BridgeConfig, FieldPrecedence};
use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::page::Page;
use crate::protocol::message::{GENERIC_FAILURE, OK_FIELD};
use crate::protocol::{MessageEvent, ResultMessage};
use crate::session::{SessionRecord, SessionStore};
use crate::transport::{CommandTransport, Endpoint, MessageOutcome, QueryTransport};

// ============================================================================
// Constants
// ============================================================================

/// Default catalog category.
pub const DEFAULT_CATEGORY: &str = "all";

/// Default number of orders returned by [`Bridge::order_history`].
pub const DEFAULT_HISTORY_LIMIT: u32 = 80;

/// Default wallet currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Action used by [`Bridge::create_order`] when the payload names none.
pub const CREATE_ORDER_ACTION: &str = "create_order";

// ============================================================================
// Bridge
// ============================================================================

/// Client for the remote endpoint.
///
/// Cheap to clone; clones share transports, registries and session.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    fields: Arc<FieldPrecedence>,
    endpoint: Endpoint,
    queries: QueryTransport,
    commands: CommandTransport,
    session: SessionStore,
}

impl Bridge {
    /// Creates a bridge on `page`.
    ///
    /// A missing endpoint is not an error here; calls fail with
    /// [`Error::Config`] until [`set_endpoint`](Self::set_endpoint) is used.
    #[must_use]
    pub fn new(page: Arc<dyn Page>, config: BridgeConfig) -> Self {
        let fields = Arc::new(config.fields.clone());
        let endpoint = Endpoint::new(config.endpoint.clone());
        let queries = QueryTransport::new(Arc::clone(&page), endpoint.clone(), &config);
        let commands = CommandTransport::new(
            Arc::clone(&page),
            endpoint.clone(),
            &config,
            Arc::clone(&fields),
        );
        let session = SessionStore::new(page, config.session.clone());

        debug!(endpoint = ?config.endpoint, timeout_ms = config.timeout_ms, "Bridge created");

        Self {
            inner: Arc::new(BridgeInner {
                config,
                fields,
                endpoint,
                queries,
                commands,
                session,
            }),
        }
    }

    // ========================================================================
    // Raw Access
    // ========================================================================

    /// Runs a read-only call and returns its raw payload.
    ///
    /// # Errors
    ///
    /// See [`QueryTransport::query`].
    pub async fn query(&self, action: &str, params: &Map<String, Value>) -> Result<Value> {
        self.inner.queries.query(action, params).await
    }

    /// Runs a state-changing call and returns its reply.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn command(&self, action: &str, payload: &Map<String, Value>) -> Result<ResultMessage> {
        self.inner.commands.command(action, payload).await
    }

    /// Replaces the endpoint for calls dispatched from now on.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        self.inner.endpoint.set(endpoint);
    }

    /// Returns the current endpoint address.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.inner.endpoint.get()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fetches the product catalog.
    ///
    /// `category` defaults to `"all"`; `token` defaults to the stored
    /// session token, or empty.
    ///
    /// # Errors
    ///
    /// Transport errors, plus [`Error::Application`] if the payload carries
    /// an error and [`Error::Protocol`] if it holds no list.
    pub async fn get_products(
        &self,
        category: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<Value>> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self.inner.session.get_token().unwrap_or_default(),
        };
        let params = object(json!({
            "cat": category.unwrap_or(DEFAULT_CATEGORY),
            "token": token,
        }));

        let payload = self.query("get_products", &params).await?;
        list_payload(payload, &self.inner.fields)
    }

    /// Fetches the order history of `email`.
    ///
    /// # Errors
    ///
    /// Same as [`get_products`](Self::get_products).
    pub async fn order_history(&self, email: &str, limit: Option<u32>) -> Result<Vec<Value>> {
        let params = object(json!({
            "email": email,
            "limit": limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        }));

        let payload = self.query("order_history", &params).await?;
        list_payload(payload, &self.inner.fields)
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<ResultMessage> {
        let payload = object(json!({
            "username": username,
            "email": email,
            "password": password,
        }));
        self.command("register", &payload).await
    }

    /// Authenticates and persists the session.
    ///
    /// The token and profile are read through the configured field
    /// precedence.
    ///
    /// # Errors
    ///
    /// - Transport and application errors of the command
    /// - [`Error::Protocol`] if a successful reply carries no token
    /// - [`Error::Storage`] if the session cannot be written
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionRecord> {
        let payload = object(json!({ "email": email, "password": password }));
        let reply = self.command("login", &payload).await?;

        let fields = &self.inner.fields;
        let token = fields
            .token
            .pick_string(&reply.payload)
            .ok_or_else(|| Error::protocol("login reply has no token"))?;
        let profile = fields.profile.pick(&reply.payload).cloned().unwrap_or(Value::Null);

        let record = SessionRecord::new(token, profile);
        self.inner.session.set_session(&record)?;
        info!(request_id = %reply.correlation_id, "Logged in");
        Ok(record)
    }

    /// Forgets the stored session.
    pub fn logout(&self) {
        self.inner.session.clear();
        info!("Logged out");
    }

    // ========================================================================
    // Wallet
    // ========================================================================

    /// Reads the wallet balance. `currency` defaults to `"USD"`.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn wallet_balance(&self, token: &str, currency: Option<&str>) -> Result<ResultMessage> {
        let payload = object(json!({
            "token": token,
            "currency": currency.unwrap_or(DEFAULT_CURRENCY),
        }));
        self.command("db_wallet_balance", &payload).await
    }

    /// Starts a wallet top-up.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn wallet_topup_create(&self, data: &Map<String, Value>) -> Result<ResultMessage> {
        self.command("db_wallet_topup_create", data).await
    }

    /// Pays from the wallet.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn wallet_pay(&self, data: &Map<String, Value>) -> Result<ResultMessage> {
        self.command("wallet_pay", data).await
    }

    /// Pays as a reseller.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn reseller_pay(&self, data: &Map<String, Value>) -> Result<ResultMessage> {
        self.command("reseller_pay", data).await
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Creates an order.
    ///
    /// The action comes from the payload's `action` field, or
    /// `"create_order"` when absent.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn create_order(&self, data: &Map<String, Value>) -> Result<ResultMessage> {
        let mut payload = data.clone();
        let action = match payload.remove("action") {
            Some(Value::String(action)) if !action.trim().is_empty() => action.trim().to_string(),
            _ => CREATE_ORDER_ACTION.to_string(),
        };
        self.command(&action, &payload).await
    }

    /// Sends a support chat message about an order.
    ///
    /// # Errors
    ///
    /// See [`CommandTransport::command`].
    pub async fn chat_support(&self, chat: &str, order_id: &str, email: &str) -> Result<ResultMessage> {
        let payload = object(json!({
            "chat": chat,
            "orderId": order_id,
            "email": email,
        }));
        self.command("chat_support", &payload).await
    }

    // ========================================================================
    // Page Glue
    // ========================================================================

    /// Forwards the text of a loaded query script.
    pub fn handle_script_response(&self, callback: &CorrelationId, body: &str) -> bool {
        self.inner.queries.handle_script_response(callback, body)
    }

    /// Forwards a direct invocation of a query callback.
    pub fn invoke_callback(&self, callback: &CorrelationId, payload: Value) -> bool {
        self.inner.queries.invoke_callback(callback, payload)
    }

    /// Forwards a query script load failure.
    pub fn handle_script_error(&self, callback: &CorrelationId) -> bool {
        self.inner.queries.handle_script_error(callback)
    }

    /// Forwards a cross-window message to the command listener.
    pub fn handle_message(&self, event: &MessageEvent) -> MessageOutcome {
        self.inner.commands.handle_message(event)
    }

    /// Forwards a command frame load failure.
    pub fn handle_frame_error(&self, id: &CorrelationId) -> bool {
        self.inner.commands.handle_frame_error(id)
    }

    /// Forwards a storage event from another tab.
    pub fn handle_storage_event(&self, key: &str, new_value: Option<&str>) -> bool {
        self.inner.session.handle_storage_event(key, new_value)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session store.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// Returns the configuration the bridge was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns the number of queries in flight.
    #[inline]
    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.inner.queries.pending_count()
    }

    /// Returns the number of commands in flight.
    #[inline]
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.inner.commands.pending_count()
    }

    /// Times out every call past its deadline, returning how many.
    pub fn expire_overdue(&self) -> usize {
        self.inner.queries.registry().expire_overdue() + self.inner.commands.registry().expire_overdue()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Extracts the records of a list-shaped query payload.
///
/// An object fails when `ok` is `false` or its primary error field holds a
/// non-blank string; the message comes from the error precedence list.
fn list_payload(payload: Value, fields: &FieldPrecedence) -> Result<Vec<Value>> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            let rejected = matches!(map.get(OK_FIELD), Some(Value::Bool(false)));
            let failed = fields
                .error
                .names()
                .first()
                .and_then(|name| map.get(name))
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty());
            if rejected || failed {
                let message = fields
                    .error
                    .names()
                    .iter()
                    .filter_map(|name| map.get(name).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|s| !s.is_empty())
                    .unwrap_or(GENERIC_FAILURE);
                return Err(Error::application(message));
            }
            fields
                .list
                .names()
                .iter()
                .find(|name| map.get(name.as_str()).is_some_and(Value::is_array))
                .cloned()
                .and_then(|name| map.remove(&name))
                .and_then(|value| match value {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| Error::protocol("query payload holds no list"))
        }
        other => Err(Error::protocol(format!("unexpected query payload: {other}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use crate::config::OriginPolicy;
    use crate::page::MemoryPage;

    const REMOTE: &str = "https://script.googleusercontent.com";

    fn setup() -> (Arc<MemoryPage>, Bridge) {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/account").unwrap());
        let config = BridgeConfig::builder()
            .endpoint("https://script.google.com/macros/s/ID/exec")
            .allow_apps_script_origins()
            .origin_policy(OriginPolicy::Strict)
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap();
        let bridge = Bridge::new(page.clone(), config);
        (page, bridge)
    }

    fn last_command_id(page: &MemoryPage) -> CorrelationId {
        let forms = page.submissions();
        let form = forms.last().unwrap();
        CorrelationId::from(form.field("request_id").unwrap())
    }

    fn reply(id: &CorrelationId, body: Value) -> MessageEvent {
        let mut body = body;
        body["request_id"] = Value::String(id.to_string());
        MessageEvent::new(REMOTE, body.to_string())
    }

    #[test]
    fn test_list_payload_shapes() {
        let fields = FieldPrecedence::default();

        assert_eq!(list_payload(json!([1, 2]), &fields).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(
            list_payload(json!({ "ok": true, "products": [{ "id": 1 }] }), &fields).unwrap(),
            vec![json!({ "id": 1 })]
        );
        assert_eq!(
            list_payload(json!({ "data": "x", "items": [3] }), &fields).unwrap(),
            vec![json!(3)]
        );

        let err = list_payload(json!({ "error": "quota exceeded" }), &fields).unwrap_err();
        assert!(err.is_application());
        assert_eq!(err.to_string(), "quota exceeded");

        let err = list_payload(json!({ "ok": false, "msg": "closed" }), &fields).unwrap_err();
        assert_eq!(err.to_string(), "closed");
        let err = list_payload(json!({ "ok": false }), &fields).unwrap_err();
        assert_eq!(err.to_string(), "Request failed");

        assert_eq!(
            list_payload(json!({ "ok": true, "error": false, "products": [1] }), &fields).unwrap(),
            vec![json!(1)]
        );
        assert_eq!(
            list_payload(
                json!({ "error": null, "message": "3 products", "products": [1, 2, 3] }),
                &fields
            )
            .unwrap()
            .len(),
            3
        );
        assert_eq!(
            list_payload(json!({ "error": "  ", "items": [] }), &fields).unwrap(),
            Vec::<Value>::new()
        );

        assert!(list_payload(json!({ "ok": true }), &fields).unwrap_err().is_protocol());
        assert!(list_payload(json!("nope"), &fields).unwrap_err().is_protocol());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_products_uses_session_token() {
        let (page, bridge) = setup();
        bridge
            .session()
            .set_session(&SessionRecord::new("tok-1", Value::Null))
            .unwrap();

        let mut call = task::spawn(bridge.get_products(None, None));
        assert_pending!(call.poll());

        let scripts = page.scripts();
        let src = scripts.last().unwrap();
        assert!(src.as_str().contains("cat=all"));
        assert!(src.as_str().contains("token=tok-1"));

        let callback = page.callbacks()[0].clone();
        assert!(bridge.invoke_callback(&callback, json!({ "products": [{ "id": "42" }] })));

        let products = assert_ready!(call.poll()).unwrap();
        assert_eq!(products, vec![json!({ "id": "42" })]);
        assert_eq!(bridge.pending_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_history_default_limit() {
        let (page, bridge) = setup();

        let mut call = task::spawn(bridge.order_history("a@b.com", None));
        assert_pending!(call.poll());

        let src = page.scripts().last().unwrap().clone();
        assert!(src.as_str().contains("limit=80"));
        assert!(src.as_str().contains("email=a%40b.com"));

        let callback = page.callbacks()[0].clone();
        bridge.handle_script_response(&callback, &format!("{callback}([])"));
        assert!(assert_ready!(call.poll()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_persists_session() {
        let (page, bridge) = setup();
        let mut changes = bridge.session().subscribe();

        let mut call = task::spawn(bridge.login("a@b.com", "x"));
        assert_pending!(call.poll());

        let form = page.submissions().last().unwrap().clone();
        assert_eq!(form.field("action"), Some("login"));
        assert_eq!(form.field("email"), Some("a@b.com"));

        let id = last_command_id(&page);
        let outcome = bridge.handle_message(&reply(
            &id,
            json!({ "ok": true, "token": "abc", "user": { "name": "Ana" } }),
        ));
        assert_eq!(outcome, MessageOutcome::Settled);

        let record = assert_ready!(call.poll()).unwrap();
        assert_eq!(record.token, "abc");
        assert_eq!(record.profile, json!({ "name": "Ana" }));
        assert_eq!(bridge.session().get_token().as_deref(), Some("abc"));
        assert!(changes.try_recv().unwrap().local);
        assert_eq!(page.attached_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_without_token_is_protocol_error() {
        let (page, bridge) = setup();

        let mut call = task::spawn(bridge.login("a@b.com", "x"));
        assert_pending!(call.poll());

        let id = last_command_id(&page);
        bridge.handle_message(&reply(&id, json!({ "ok": true })));

        assert!(assert_ready!(call.poll()).unwrap_err().is_protocol());
        assert!(bridge.session().get_token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejected() {
        let (page, bridge) = setup();

        let mut call = task::spawn(bridge.login("a@b.com", "wrong"));
        assert_pending!(call.poll());

        let id = last_command_id(&page);
        bridge.handle_message(&reply(&id, json!({ "ok": false, "error": "bad credentials" })));

        let err = assert_ready!(call.poll()).unwrap_err();
        assert!(err.is_application());
        assert_eq!(err.to_string(), "bad credentials");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_session() {
        let (_page, bridge) = setup();
        bridge
            .session()
            .set_session(&SessionRecord::new("tok", Value::Null))
            .unwrap();

        bridge.logout();
        assert!(bridge.session().get_token().is_none());
        assert!(bridge.session().get_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_actions_and_defaults() {
        let (page, bridge) = setup();

        let mut balance = task::spawn(bridge.wallet_balance("tok", None));
        assert_pending!(balance.poll());
        let form = page.submissions().last().unwrap().clone();
        assert_eq!(form.field("action"), Some("db_wallet_balance"));
        assert_eq!(form.field("currency"), Some("USD"));

        let mut chat = task::spawn(bridge.chat_support("hello", "ORD-7", "a@b.com"));
        assert_pending!(chat.poll());
        let form = page.submissions().last().unwrap().clone();
        assert_eq!(form.field("action"), Some("chat_support"));
        assert_eq!(form.field("orderId"), Some("ORD-7"));

        let order = object(json!({ "action": "create_order_pi", "qty": 2 }));
        let mut create = task::spawn(bridge.create_order(&order));
        assert_pending!(create.poll());
        let form = page.submissions().last().unwrap().clone();
        assert_eq!(form.field("action"), Some("create_order_pi"));
        assert_eq!(form.field("qty"), Some("2"));

        assert_eq!(bridge.pending_commands(), 3);
    }

    #[tokio::test]
    async fn test_set_endpoint_applies_to_later_calls() {
        let page = Arc::new(MemoryPage::new("https://shop.example.com/").unwrap());
        let bridge = Bridge::new(page.clone(), BridgeConfig::default());

        let err = bridge.get_products(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(page.attached_count(), 0);

        bridge.set_endpoint(" https://remote.example/exec ");
        assert_eq!(bridge.endpoint().as_deref(), Some("https://remote.example/exec"));
    }
}
