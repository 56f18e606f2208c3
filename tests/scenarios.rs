//! End-to-end scenarios through the public [`Bridge`] on an in-memory page.
//!
//! Set `RUST_LOG=nocors_bridge=debug` to see the call lifecycle.

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tokio_test::{assert_pending, assert_ready, task};
use tracing_subscriber::EnvFilter;

use nocors_bridge::{
    Bridge, BridgeConfig, CorrelationId, FrameName, MemoryPage, MessageEvent, MessageOutcome,
    OriginPolicy,
};

// ============================================================================
// Setup
// ============================================================================

const ENDPOINT: &str = "https://script.google.com/macros/s/ID/exec";
const REMOTE: &str = "https://script.googleusercontent.com";
const TIMEOUT: Duration = Duration::from_secs(20);

static LOGGING: Once = Once::new();

fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

fn setup() -> Result<(Arc<MemoryPage>, Bridge)> {
    init_logging();
    let page = Arc::new(MemoryPage::new("https://shop.example.com/account")?);
    let config = BridgeConfig::builder()
        .endpoint(ENDPOINT)
        .allow_apps_script_origins()
        .origin_policy(OriginPolicy::Strict)
        .timeout(TIMEOUT)
        .build()?;
    Ok((page.clone(), Bridge::new(page, config)))
}

fn credentials() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("email".into(), json!("a@b.com"));
    map.insert("password".into(), json!("x"));
    map
}

fn request_ids(page: &MemoryPage) -> Vec<CorrelationId> {
    page.submissions()
        .iter()
        .filter_map(|form| form.field("request_id").map(CorrelationId::from))
        .collect()
}

fn reply(origin: &str, id: &CorrelationId, body: Value) -> MessageEvent {
    let mut body = body;
    body["request_id"] = Value::String(id.to_string());
    MessageEvent::new(origin, body.to_string())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn query_resolves_with_script_payload() -> Result<()> {
    let (page, bridge) = setup()?;

    let params = Map::new();
    let mut call = task::spawn(bridge.query("get_products", &params));
    assert_pending!(call.poll());

    let callback = page.callbacks()[0].clone();
    let body = format!(r#"{callback}([{{"id":"42","nom":"Test"}}])"#);
    assert!(bridge.handle_script_response(&callback, &body));

    let value = assert_ready!(call.poll())?;
    assert_eq!(value, json!([{ "id": "42", "nom": "Test" }]));
    assert_eq!(page.attached_count(), 0);
    assert!(page.callbacks().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn login_command_round_trip() -> Result<()> {
    let (page, bridge) = setup()?;
    let payload = credentials();

    let mut call = task::spawn(bridge.command("login", &payload));
    assert_pending!(call.poll());

    assert_eq!(page.frames().len(), 1);
    assert_eq!(page.form_count(), 1);
    let form = &page.submissions()[0];
    assert_eq!(form.field("transport"), Some("iframe"));
    assert_eq!(form.field("origin"), Some("https://shop.example.com"));
    assert_eq!(form.field("action"), Some("login"));

    let id = request_ids(&page).remove(0);
    let frame = FrameName::for_request(&id);
    let event = reply(REMOTE, &id, json!({ "ok": true, "token": "abc" })).with_source(frame);
    assert_eq!(bridge.handle_message(&event), MessageOutcome::Settled);

    let result = assert_ready!(call.poll())?;
    assert_eq!(result.to_value(), json!({ "ok": true, "token": "abc" }));
    assert!(page.frames().is_empty());
    assert_eq!(page.form_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_commands_do_not_cross_settle() -> Result<()> {
    let (page, bridge) = setup()?;
    let payload = credentials();

    let mut first = task::spawn(bridge.command("login", &payload));
    let mut second = task::spawn(bridge.command("login", &payload));
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    let ids = request_ids(&page);
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    bridge.handle_message(&reply(REMOTE, &ids[1], json!({ "ok": true, "token": "second" })));

    let result = assert_ready!(second.poll())?;
    assert_eq!(result.get_str("token"), Some("second"));
    assert_pending!(first.poll());
    assert_eq!(bridge.pending_commands(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unanswered_command_times_out() -> Result<()> {
    let (page, bridge) = setup()?;
    let started = tokio::time::Instant::now();

    let err = bridge
        .command("login", &credentials())
        .await
        .expect_err("no reply was sent");

    assert!(err.is_timeout());
    assert!(started.elapsed() <= TIMEOUT + Duration::from_millis(1));
    assert!(page.frames().is_empty());
    assert_eq!(page.attached_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disallowed_origin_never_settles() -> Result<()> {
    let (page, bridge) = setup()?;

    let creds = credentials();
    let mut call = task::spawn(bridge.command("login", &creds));
    assert_pending!(call.poll());

    let id = request_ids(&page).remove(0);
    let outcome = bridge.handle_message(&reply(
        "https://evil.example",
        &id,
        json!({ "ok": true, "token": "stolen" }),
    ));
    assert_eq!(outcome, MessageOutcome::DisallowedOrigin);
    assert_pending!(call.poll());

    tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
    let err = assert_ready!(call.poll()).expect_err("call must time out");
    assert!(err.is_timeout());
    assert_eq!(page.attached_count(), 0);
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn late_and_unknown_replies_are_ignored() -> Result<()> {
    let (page, bridge) = setup()?;

    let creds = credentials();
    let mut call = task::spawn(bridge.command("login", &creds));
    assert_pending!(call.poll());
    let id = request_ids(&page).remove(0);

    let unknown = CorrelationId::from("REQ-unknown");
    assert_eq!(
        bridge.handle_message(&reply(REMOTE, &unknown, json!({ "ok": true }))),
        MessageOutcome::UnknownRequest
    );

    assert!(bridge.handle_message(&reply(REMOTE, &id, json!({ "ok": true }))).settled());
    assert_ready!(call.poll())?;

    assert_eq!(
        bridge.handle_message(&reply(REMOTE, &id, json!({ "ok": false }))),
        MessageOutcome::UnknownRequest
    );
    assert!(!bridge.handle_frame_error(&id));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_queries_settle_out_of_order() -> Result<()> {
    const CALLS: usize = 8;
    let (page, bridge) = setup()?;

    let handles: Vec<_> = (0..CALLS)
        .map(|n| {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let mut params = Map::new();
                params.insert("n".into(), json!(n));
                bridge.query("get_products", &params).await
            })
        })
        .collect();

    while page.callbacks().len() < CALLS {
        tokio::task::yield_now().await;
    }

    for src in page.scripts().iter().rev() {
        let pairs: Map<String, Value> = src
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        let callback = CorrelationId::from(pairs["callback"].as_str().unwrap_or_default());
        assert!(bridge.invoke_callback(&callback, json!([pairs["n"]])));
    }

    let results = futures_util::future::try_join_all(handles).await?;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result?, json!([n.to_string()]));
    }
    assert_eq!(bridge.pending_queries(), 0);
    assert!(page.callbacks().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn session_is_shared_with_sibling_subdomain() -> Result<()> {
    let (page, bridge) = setup()?;

    let mut call = task::spawn(bridge.login("a@b.com", "x"));
    assert_pending!(call.poll());
    let id = request_ids(&page).remove(0);
    bridge.handle_message(&reply(REMOTE, &id, json!({ "ok": true, "token": "abc" })));
    assert_ready!(call.poll())?;

    let sibling = Arc::new(page.sibling("https://wallet.example.com/")?);
    let sibling_bridge = Bridge::new(sibling, bridge.config().clone());
    assert_eq!(sibling_bridge.session().get_token().as_deref(), Some("abc"));

    let mut changes = sibling_bridge.session().subscribe();
    let marker = bridge.session().change_marker();
    assert!(sibling_bridge.handle_storage_event("nocors_session_changed", marker.as_deref()));
    assert!(!changes.try_recv()?.local);
    Ok(())
}
