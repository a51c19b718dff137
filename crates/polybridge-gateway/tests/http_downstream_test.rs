//! JSON-RPC over HTTP downstream against a mock axum backend.

use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use polybridge_common::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use polybridge_common::{
    headers, ErrorCode, ExternalProtocol, ExternalRequest, InternalProtocol, InternalRequest,
    ServiceEndpoint,
};
use polybridge_gateway::{Bridge, BridgeConfig, Downstream, JsonRpcHttpDownstream};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn rpc_backend(http_headers: HeaderMap, Json(request): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match request.method.as_str() {
        "Calculator.add" => {
            let sum: i64 = request
                .params
                .as_array()
                .map(|args| args.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            JsonRpcResponse::success(id, json!(sum))
        }
        "Calculator.trace" => {
            let trace_id = http_headers
                .get(headers::TRACE_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            JsonRpcResponse::success(id, json!(trace_id))
        }
        "Calculator.secret" => JsonRpcResponse::error(
            id,
            JsonRpcError {
                code: 403,
                message: "forbidden".into(),
                data: Some(json!({"reason": "no token"})),
            },
        ),
        _ => JsonRpcResponse::error(id, JsonRpcError::method_not_found()),
    };
    Json(response)
}

async fn spawn_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/", post(rpc_backend));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Address with nothing listening on it.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn endpoint(addr: SocketAddr) -> ServiceEndpoint {
    ServiceEndpoint::new("calc-1", "Calculator", addr.ip().to_string(), addr.port())
        .with_protocol(InternalProtocol::InternalJsonrpc)
}

fn http_bridge(config: BridgeConfig, addr: SocketAddr) -> Bridge {
    init_tracing();
    let bridge = Bridge::new(config, Arc::new(JsonRpcHttpDownstream::new())).unwrap();
    bridge.router().add_service_endpoint("Calculator", endpoint(addr));
    bridge
}

// ============================================================================
// Downstream
// ============================================================================

#[tokio::test]
async fn test_call_returns_result_payload() {
    let addr = spawn_backend().await;
    let request = InternalRequest::new("Calculator", "add", "[1, 2, 3]");
    let response = JsonRpcHttpDownstream::new()
        .call(&endpoint(addr), &request)
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(&response.payload[..], b"6");
    assert_eq!(response.headers.get(headers::TRACE_ID).map(String::as_str), Some(request.trace_id()));
}

#[tokio::test]
async fn test_remote_error_code_is_mapped() {
    let addr = spawn_backend().await;
    let downstream = JsonRpcHttpDownstream::new();

    let request = InternalRequest::new("Calculator", "secret", "null");
    let response = downstream.call(&endpoint(addr), &request).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error_code, Some(ErrorCode::Forbidden));
    assert_eq!(response.error_details, Some(json!({"reason": "no token"})));

    let request = InternalRequest::new("Calculator", "nope", "null");
    let response = downstream.call(&endpoint(addr), &request).await.unwrap();
    assert_eq!(response.error_code, Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn test_refused_connection_is_connection_error() {
    let addr = closed_port().await;
    let request = InternalRequest::new("Calculator", "add", "[]");
    let err = JsonRpcHttpDownstream::new()
        .call(&endpoint(addr), &request)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectionError);
}

// ============================================================================
// Through the bridge
// ============================================================================

#[tokio::test]
async fn test_jsonrpc_client_to_http_backend() {
    let addr = spawn_backend().await;
    let bridge = http_bridge(BridgeConfig::default(), addr);

    let request = ExternalRequest::new(
        ExternalProtocol::JsonRpc,
        json!({"jsonrpc": "2.0", "method": "Calculator.add", "params": [20, 22], "id": 7}).to_string(),
    );
    let response = bridge.handle(request).await;
    assert_eq!(response.body_json().unwrap(), json!({"jsonrpc": "2.0", "result": 42, "id": 7}));
}

#[tokio::test]
async fn test_trace_id_reaches_backend() {
    let addr = spawn_backend().await;
    let bridge = http_bridge(BridgeConfig::default(), addr);

    let request = ExternalRequest::new(ExternalProtocol::Rest, "null")
        .with_service("Calculator")
        .with_method("trace")
        .with_header(headers::TRACE_ID, "trace-from-client");
    let response = bridge.handle(request).await;
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json().unwrap(), json!("trace-from-client"));
}

#[tokio::test]
async fn test_remote_forbidden_is_not_retried() {
    let addr = spawn_backend().await;
    let bridge = http_bridge(BridgeConfig::default(), addr);

    let request = ExternalRequest::new(ExternalProtocol::Rest, "null")
        .with_service("Calculator")
        .with_method("secret");
    let response = bridge.handle(request).await;
    assert_eq!(response.status_code, 403);
    assert_eq!(
        response.body_json().unwrap()["error"]["details"],
        json!({"reason": "no token"})
    );
    assert_eq!(bridge.breaker_stats()[0].total_failures, 1);
}

#[tokio::test]
async fn test_unreachable_backend_exhausts_retries() {
    let addr = closed_port().await;
    let config = BridgeConfig::from_json(r#"{"retry": {"max_attempts": 3, "initial_delay_ms": 1}}"#).unwrap();
    let bridge = http_bridge(config, addr);

    let request = ExternalRequest::new(ExternalProtocol::Rest, "[1]")
        .with_service("Calculator")
        .with_method("add");
    let response = bridge.handle(request).await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.body_json().unwrap()["error"]["code"], json!(603));
    assert_eq!(bridge.breaker_stats()[0].total_failures, 3);
}

#[tokio::test]
async fn test_non_jsonrpc_endpoint_is_not_implemented() {
    init_tracing();
    let bridge = Bridge::new(BridgeConfig::default(), Arc::new(JsonRpcHttpDownstream::new())).unwrap();
    bridge.router().add_service_endpoint(
        "Calculator",
        ServiceEndpoint::new("calc-bin", "Calculator", "127.0.0.1", 1).with_protocol(InternalProtocol::CustomBinary),
    );

    let request = ExternalRequest::new(ExternalProtocol::Rest, "[]")
        .with_service("Calculator")
        .with_method("add");
    let response = bridge.handle(request).await;
    assert_eq!(response.status_code, 501);
}
