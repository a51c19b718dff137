//! End-to-end tests of the bridge pipeline with in-process downstreams.
//!
//! Covers:
//! 1. Protocol round trips through typed handlers
//! 2. Content-based routing rules
//! 3. Error rendering per protocol
//! 4. Circuit breaking and retries per endpoint
//! 5. Least-connections selection under concurrent load

use async_trait::async_trait;
use polybridge_common::{
    headers, metadata_keys, BridgeError, ErrorCode, ExternalProtocol, ExternalRequest,
    InternalRequest, InternalResponse, MessageType, Result, ServiceEndpoint,
};
use polybridge_gateway::{Bridge, BridgeConfig, Downstream, HandlerTable, LocalDownstream};
use polybridge_router::{BalancerStrategy, RoutingRule};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Deserialize)]
struct AddParams {
    a: i64,
    b: i64,
}

fn calculator() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register_typed("Calculator", "add", |(a, b): (i64, i64)| async move {
        Ok::<_, BridgeError>(a + b)
    });
    table.register_typed("Calculator", "add_named", |p: AddParams| async move {
        Ok::<_, BridgeError>(json!({ "sum": p.a + p.b }))
    });
    table.register_typed("Calculator", "secret", |_: Value| async move {
        Err::<Value, _>(BridgeError::new(ErrorCode::Forbidden, "not allowed"))
    });
    table.register_typed("Calculator", "notify", |_: Value| async move { Ok::<_, BridgeError>(()) });
    table.register_typed("Calculator-canary", "add", |(a, b): (i64, i64)| async move {
        Ok::<_, BridgeError>(json!({ "canary": a + b }))
    });
    table
}

fn calculator_bridge(config: BridgeConfig) -> Bridge {
    init_tracing();
    let bridge = Bridge::new(config, Arc::new(LocalDownstream::new(calculator()))).unwrap();
    let router = bridge.router();
    router.add_service_endpoint("Calculator", ServiceEndpoint::new("calc-1", "Calculator", "local", 0));
    router.add_service_endpoint(
        "Calculator-canary",
        ServiceEndpoint::new("canary-1", "Calculator-canary", "local", 0),
    );
    bridge
}

fn jsonrpc(body: Value) -> ExternalRequest {
    ExternalRequest::new(ExternalProtocol::JsonRpc, body.to_string())
}

fn rest(service: &str, method: &str, body: Value) -> ExternalRequest {
    ExternalRequest::new(ExternalProtocol::Rest, body.to_string())
        .with_http_method("POST")
        .with_header("X-Service-Name", service)
        .with_header("X-Method-Name", method)
}

/// Downstream failing with `CONNECTION_ERROR` for the first `failures` calls.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downstream for Flaky {
    async fn call(&self, _: &ServiceEndpoint, request: &InternalRequest) -> Result<InternalResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(BridgeError::connection("connection refused"));
        }
        Ok(InternalResponse::success(request.payload.clone()))
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn test_jsonrpc_round_trip_echoes_id() {
    let bridge = calculator_bridge(BridgeConfig::default());
    let response = bridge
        .handle(jsonrpc(json!({"jsonrpc": "2.0", "method": "Calculator.add", "params": [3, 4], "id": 7})))
        .await;

    assert_eq!(response.protocol, ExternalProtocol::JsonRpc);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.message_type, MessageType::RequestResponse);
    assert_eq!(response.body_json().unwrap(), json!({"jsonrpc": "2.0", "result": 7, "id": 7}));
}

#[tokio::test]
async fn test_jsonrpc_notification_has_no_body() {
    let bridge = calculator_bridge(BridgeConfig::default());
    let response = bridge
        .handle(jsonrpc(json!({"jsonrpc": "2.0", "method": "Calculator.notify", "params": {}})))
        .await;
    assert_eq!(response.status_code, 204);
    assert_eq!(response.message_type, MessageType::PublishSubscribe);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_rest_round_trip_with_trace_id() {
    let bridge = calculator_bridge(BridgeConfig::default());
    let request = rest("Calculator", "add_named", json!({"a": 2, "b": 40}))
        .with_header(headers::TRACE_ID, "trace-123");
    let response = bridge.handle(request).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json().unwrap(), json!({"sum": 42}));
    assert_eq!(response.header(headers::TRACE_ID), Some("trace-123"));
    assert_eq!(response.metadata.get(metadata_keys::HTTP_METHOD), Some(&json!("POST")));
}

#[tokio::test]
async fn test_rest_path_template() {
    let config = BridgeConfig::default().with_path_template("/api/{service}/{method}");
    let bridge = calculator_bridge(config);
    let request = ExternalRequest::new(ExternalProtocol::Rest, "[1, 1]")
        .with_http_method("POST")
        .with_metadata(metadata_keys::PATH, "/api/Calculator/add");
    let response = bridge.handle(request).await;
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json().unwrap(), json!(2));
}

#[tokio::test]
async fn test_websocket_envelope_round_trip() {
    let bridge = calculator_bridge(BridgeConfig::default());
    let request = ExternalRequest::new(ExternalProtocol::WebSocket, "[5, 6]")
        .with_service("Calculator")
        .with_method("add")
        .with_message_type(MessageType::Stream);
    let response = bridge.handle(request).await;

    assert_eq!(response.protocol, ExternalProtocol::WebSocket);
    assert_eq!(response.message_type, MessageType::Stream);
    assert_eq!(&response.body[..], b"11");
    assert_eq!(response.metadata.get(metadata_keys::FRAMING), Some(&json!("text")));
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_routing_rule_redirects_to_canary() {
    let bridge = calculator_bridge(BridgeConfig::default());
    bridge.router().register_rule(RoutingRule::header_equals(
        "canary",
        10,
        "x-canary",
        "true",
        "Calculator-canary",
    ));

    let canary = rest("Calculator", "add", json!([1, 2])).with_header("x-canary", "true");
    assert_eq!(bridge.handle(canary).await.body_json().unwrap(), json!({"canary": 3}));

    let stable = rest("Calculator", "add", json!([1, 2]));
    assert_eq!(bridge.handle(stable).await.body_json().unwrap(), json!(3));
}

#[tokio::test]
async fn test_unregistered_service_is_routing_error() {
    let bridge = calculator_bridge(BridgeConfig::default());

    let response = bridge.handle(rest("Billing", "charge", json!({}))).await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.body_json().unwrap()["error"]["code"], json!(602));

    let response = bridge
        .handle(jsonrpc(json!({"jsonrpc": "2.0", "method": "Billing.charge", "id": 1})))
        .await;
    let body = response.body_json().unwrap();
    assert_eq!(body["error"]["code"], json!(602));
    assert_eq!(body["id"], json!(1));
}

// ============================================================================
// Error rendering
// ============================================================================

#[tokio::test]
async fn test_application_errors_keep_their_code() {
    let bridge = calculator_bridge(BridgeConfig::default());

    let response = bridge.handle(rest("Calculator", "secret", json!(null))).await;
    assert_eq!(response.status_code, 403);
    assert_eq!(response.body_json().unwrap()["error"]["message"], json!("not allowed"));

    let response = bridge.handle(rest("Calculator", "missing", json!(null))).await;
    assert_eq!(response.status_code, 404);

    let response = bridge.handle(rest("Calculator", "add", json!("nope"))).await;
    assert_eq!(response.status_code, 400);
}

#[tokio::test]
async fn test_malformed_jsonrpc_is_rendered_with_null_id() {
    let bridge = calculator_bridge(BridgeConfig::default());
    let response = bridge
        .handle(ExternalRequest::new(ExternalProtocol::JsonRpc, "{\"jsonrpc\":"))
        .await;
    let body = response.body_json().unwrap();
    assert_eq!(body["error"]["code"], json!(601));
    assert_eq!(body["id"], Value::Null);
}

// ============================================================================
// Resilience
// ============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried() {
    init_tracing();
    let config = BridgeConfig::from_json(r#"{"retry": {"initial_delay_ms": 1}}"#).unwrap();
    let downstream = Arc::new(Flaky::new(1));
    let bridge = Bridge::new(config, downstream.clone()).unwrap();
    bridge
        .router()
        .add_service_endpoint("echo", ServiceEndpoint::new("echo-1", "echo", "local", 0));

    let response = bridge.handle(rest("echo", "say", json!({"hello": "world"}))).await;
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json().unwrap(), json!({"hello": "world"}));
    assert_eq!(downstream.calls(), 2);

    let stats = bridge.breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_failures, 1);
    assert_eq!(stats[0].total_successes, 1);
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    init_tracing();
    let config = BridgeConfig::from_json(
        r#"{"retry": {"max_attempts": 1}, "circuit_breaker": {"failure_threshold": 2}}"#,
    )
    .unwrap();
    let downstream = Arc::new(Flaky::new(u32::MAX));
    let bridge = Bridge::new(config, downstream.clone()).unwrap();
    bridge
        .router()
        .add_service_endpoint("echo", ServiceEndpoint::new("echo-1", "echo", "local", 0));

    for _ in 0..2 {
        let response = bridge.handle(rest("echo", "say", json!({}))).await;
        assert_eq!(response.body_json().unwrap()["error"]["code"], json!(603));
    }

    let response = bridge.handle(rest("echo", "say", json!({}))).await;
    assert_eq!(response.status_code, 503);
    assert_eq!(downstream.calls(), 2);
    assert_eq!(bridge.breaker_stats()[0].total_rejections, 1);
}

#[tokio::test]
async fn test_breakers_are_isolated_per_endpoint() {
    init_tracing();
    let config = BridgeConfig::from_json(
        r#"{"retry": {"max_attempts": 1}, "circuit_breaker": {"failure_threshold": 1}}"#,
    )
    .unwrap();
    let bridge = Bridge::new(config, Arc::new(LocalDownstream::new(calculator()))).unwrap();
    bridge
        .router()
        .add_service_endpoint("Calculator", ServiceEndpoint::new("calc-1", "Calculator", "local", 0));
    bridge
        .router()
        .add_service_endpoint("Calculator", ServiceEndpoint::new("calc-2", "Calculator", "local", 0));

    // Round robin: calc-1 fails, then calc-2 still serves.
    let failed = bridge.handle(rest("Calculator", "secret", json!(null))).await;
    assert_eq!(failed.status_code, 403);
    let served = bridge.handle(rest("Calculator", "add", json!([2, 2]))).await;
    assert_eq!(served.status_code, 200);

    let stats = bridge.breaker_stats();
    assert_eq!(stats[0].name, "Calculator/calc-1");
    assert_eq!(stats[0].state.to_string(), "OPEN");
    assert_eq!(stats[1].name, "Calculator/calc-2");
    assert_eq!(stats[1].state.to_string(), "CLOSED");
}

/// Two services that both name their only endpoint `node-1`.
fn shared_id_bridge() -> Bridge {
    init_tracing();
    let mut table = HandlerTable::new();
    for service in ["Orders", "Billing"] {
        table.register_typed(service, "ok", |_: Value| async move { Ok::<_, BridgeError>(true) });
        table.register_typed(service, "deny", |_: Value| async move {
            Err::<Value, _>(BridgeError::new(ErrorCode::Forbidden, "not allowed"))
        });
    }
    let config = BridgeConfig::from_json(
        r#"{"retry": {"max_attempts": 1}, "circuit_breaker": {"failure_threshold": 1}}"#,
    )
    .unwrap();
    let bridge = Bridge::new(config, Arc::new(LocalDownstream::new(table))).unwrap();
    for service in ["Orders", "Billing"] {
        bridge
            .router()
            .add_service_endpoint(service, ServiceEndpoint::new("node-1", service, "local", 0));
    }
    bridge
}

#[tokio::test]
async fn test_same_endpoint_id_in_two_services_has_two_breakers() {
    let bridge = shared_id_bridge();

    let failed = bridge.handle(rest("Orders", "deny", json!(null))).await;
    assert_eq!(failed.status_code, 403);
    let rejected = bridge.handle(rest("Orders", "ok", json!(null))).await;
    assert_eq!(rejected.status_code, 503);

    let served = bridge.handle(rest("Billing", "ok", json!(null))).await;
    assert_eq!(served.status_code, 200);
    assert_eq!(served.body_json().unwrap(), json!(true));

    let stats = bridge.breaker_stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].name, "Billing/node-1");
    assert_eq!(stats[0].state.to_string(), "CLOSED");
    assert_eq!(stats[1].name, "Orders/node-1");
    assert_eq!(stats[1].state.to_string(), "OPEN");
}

#[tokio::test]
async fn test_removed_endpoint_drops_its_breaker() {
    let bridge = shared_id_bridge();

    let failed = bridge.handle(rest("Orders", "deny", json!(null))).await;
    assert_eq!(failed.status_code, 403);
    assert_eq!(bridge.breaker_stats()[0].state.to_string(), "OPEN");

    assert!(bridge.router().remove_service_endpoint("Orders", "node-1"));
    assert!(bridge.breaker_stats().is_empty());

    // Same id registered again starts closed.
    bridge
        .router()
        .add_service_endpoint("Orders", ServiceEndpoint::new("node-1", "Orders", "local", 0));
    let served = bridge.handle(rest("Orders", "ok", json!(null))).await;
    assert_eq!(served.status_code, 200);
    let stats = bridge.breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].state.to_string(), "CLOSED");
    assert_eq!(stats[0].total_failures, 0);
}

#[tokio::test]
async fn test_table_refresh_keeps_breaker_of_unchanged_endpoint() {
    let bridge = shared_id_bridge();
    let failed = bridge.handle(rest("Orders", "deny", json!(null))).await;
    assert_eq!(failed.status_code, 403);

    let mut table = polybridge_router::RoutingTable::new();
    table.insert(
        "Orders".to_string(),
        vec![ServiceEndpoint::new("node-1", "Orders", "local", 0)],
    );
    bridge.router().update_routing_table(table);

    let rejected = bridge.handle(rest("Orders", "ok", json!(null))).await;
    assert_eq!(rejected.status_code, 503);
    let stats = bridge.breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name, "Orders/node-1");
}

/// Downstream that holds every call for a while and records the endpoint.
struct Slow {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Downstream for Slow {
    async fn call(&self, endpoint: &ServiceEndpoint, _: &InternalRequest) -> Result<InternalResponse> {
        self.seen.lock().unwrap().push(endpoint.id.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(InternalResponse::success("true"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_least_connections_sees_in_flight_calls() {
    let downstream = Arc::new(Slow {
        seen: Mutex::new(Vec::new()),
    });
    let config = BridgeConfig::default().with_balancer(BalancerStrategy::LeastConnections);
    let bridge = Bridge::new(config, downstream.clone()).unwrap();
    bridge
        .router()
        .add_service_endpoint("svc", ServiceEndpoint::new("a", "svc", "local", 0));
    bridge
        .router()
        .add_service_endpoint("svc", ServiceEndpoint::new("b", "svc", "local", 0));

    let (first, second) = tokio::join!(bridge.handle(rest("svc", "m", json!(null))), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        bridge.handle(rest("svc", "m", json!(null))).await
    });
    assert_eq!(first.status_code, 200);
    assert_eq!(second.status_code, 200);
    assert_eq!(*downstream.seen.lock().unwrap(), vec!["a", "b"]);

    let endpoints = bridge.router().endpoints("svc");
    assert!(endpoints.iter().all(|e| e.active_connections() == 0));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_reports_timeout() {
    let downstream = Arc::new(Slow {
        seen: Mutex::new(Vec::new()),
    });
    let bridge = Bridge::new(BridgeConfig::default(), downstream).unwrap();
    bridge
        .router()
        .add_service_endpoint("svc", ServiceEndpoint::new("a", "svc", "local", 0));

    let token = CancellationToken::new();
    let canceller = token.clone();
    let (response, _) = tokio::join!(
        bridge.handle_cancellable(rest("svc", "m", json!(null)), &token),
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        }
    );

    assert_eq!(response.status_code, 408);
    assert_eq!(bridge.breaker_stats()[0].total_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_from_config() {
    let config = BridgeConfig::from_json(r#"{"default_timeout_ms": 20, "retry": {"max_attempts": 2}}"#).unwrap();
    let downstream = Arc::new(Slow {
        seen: Mutex::new(Vec::new()),
    });
    let bridge = Bridge::new(config, downstream.clone()).unwrap();
    bridge
        .router()
        .add_service_endpoint("svc", ServiceEndpoint::new("a", "svc", "local", 0));

    let response = bridge.handle(rest("svc", "m", json!(null))).await;
    assert_eq!(response.status_code, 408);
    assert_eq!(downstream.seen.lock().unwrap().len(), 2);
}
