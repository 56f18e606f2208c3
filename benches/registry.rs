//! Registry benchmark suite.
//!
//! Benchmarks call dispatch and settlement at different scales:
//! - Concurrent calls: 10, 100, 1000
//! - Paths: raw registry, query transport, command transport
//!
//! Run with: cargo bench --bench registry
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Map, Value, json};
use tokio::runtime::Runtime;

use nocors_bridge::{
    Bridge, BridgeConfig, CorrelationId, MemoryPage, MessageEvent, RequestRegistry,
    TransportResources,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CALL_COUNTS: &[usize] = &[10, 100, 1000];
const TIMEOUT: Duration = Duration::from_secs(20);
const REMOTE: &str = "https://script.googleusercontent.com";

fn page() -> Arc<MemoryPage> {
    Arc::new(MemoryPage::new("https://shop.example.com/").expect("valid page url"))
}

fn bridge(page: Arc<MemoryPage>, max_pending: usize) -> Bridge {
    let config = BridgeConfig::builder()
        .endpoint("https://script.google.com/macros/s/ID/exec")
        .allow_apps_script_origins()
        .max_pending(max_pending)
        .timeout(TIMEOUT)
        .build()
        .expect("valid config");
    Bridge::new(page, config)
}

// ============================================================================
// Benchmark: Register + Settle
// ============================================================================

fn bench_register_settle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("register_settle");

    for &count in CALL_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("registry", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let page = page();
                let registry = RequestRegistry::<Value>::new("bench", count);

                let calls: Vec<_> = (0..count)
                    .map(|_| {
                        let resources = TransportResources::new(page.clone());
                        registry
                            .register(CorrelationId::request(), resources, TIMEOUT)
                            .expect("under cap")
                    })
                    .collect();

                for call in calls.iter().rev() {
                    registry.settle(call.id(), Ok(Value::Null));
                }
                futures_util::future::try_join_all(calls).await.expect("all settled")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Query Round Trip
// ============================================================================

fn bench_query_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("query_round_trip");

    for &count in CALL_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("query", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let page = page();
                let bridge = bridge(page.clone(), count);

                let handles: Vec<_> = (0..count)
                    .map(|_| {
                        let bridge = bridge.clone();
                        tokio::spawn(async move { bridge.query("get_products", &Map::new()).await })
                    })
                    .collect();

                while page.callbacks().len() < count {
                    tokio::task::yield_now().await;
                }
                for callback in page.callbacks() {
                    let body = format!(r#"{callback}([{{"id":"42","nom":"Test"}}]);"#);
                    bridge.handle_script_response(&callback, &body);
                }
                futures_util::future::try_join_all(handles).await.expect("no panics")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Command Round Trip
// ============================================================================

fn bench_command_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("command_round_trip");

    for &count in CALL_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("command", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let page = page();
                let bridge = bridge(page.clone(), count);

                let handles: Vec<_> = (0..count)
                    .map(|_| {
                        let bridge = bridge.clone();
                        tokio::spawn(async move { bridge.command("login", &Map::new()).await })
                    })
                    .collect();

                while page.submissions().len() < count {
                    tokio::task::yield_now().await;
                }
                for form in page.submissions() {
                    let id = form.field("request_id").unwrap_or_default();
                    let body = json!({ "request_id": id, "ok": true, "token": "abc" });
                    bridge.handle_message(&MessageEvent::new(REMOTE, body.to_string()));
                }
                futures_util::future::try_join_all(handles).await.expect("no panics")
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_register_settle,
    bench_query_round_trip,
    bench_command_round_trip
);
criterion_main!(benches);
