//! JSON-RPC over HTTP towards `INTERNAL_JSONRPC` endpoints.

use crate::downstream::Downstream;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use polybridge_common::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use polybridge_common::{
    headers, BridgeError, ErrorCode, InternalProtocol, InternalRequest, InternalResponse,
    JsonSerializer, Result, Serializer, ServiceEndpoint,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Sends each attempt as a JSON-RPC 2.0 `POST` with method `service.method`.
///
/// The trace id is forwarded in the `x-trace-id` header. Remote JSON-RPC
/// error codes that name a framework code are kept. The reserved JSON-RPC
/// codes map to their closest framework code and anything else becomes
/// `INTERNAL_ERROR`.
pub struct JsonRpcHttpDownstream {
    client: Client<HttpConnector, Full<Bytes>>,
    path: String,
    next_id: AtomicU64,
}

impl JsonRpcHttpDownstream {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            path: "/".to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Request path on the endpoint, `/` by default.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') { path } else { format!("/{path}") };
        self
    }

    fn map_remote_code(code: i32) -> ErrorCode {
        match code {
            METHOD_NOT_FOUND => ErrorCode::NotFound,
            PARSE_ERROR | INVALID_REQUEST | INVALID_PARAMS => ErrorCode::BadRequest,
            INTERNAL_ERROR => ErrorCode::InternalError,
            other => u16::try_from(other)
                .ok()
                .and_then(ErrorCode::from_u16)
                .unwrap_or(ErrorCode::InternalError),
        }
    }
}

impl Default for JsonRpcHttpDownstream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JsonRpcHttpDownstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcHttpDownstream")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl Downstream for JsonRpcHttpDownstream {
    async fn call(&self, endpoint: &ServiceEndpoint, request: &InternalRequest) -> Result<InternalResponse> {
        if endpoint.protocol != InternalProtocol::InternalJsonrpc {
            return Err(BridgeError::not_implemented(format!(
                "no transport for {} endpoint {}",
                endpoint.protocol.as_str(),
                endpoint.id
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = JsonSerializer.decode(&request.payload)?;
        let rpc = JsonRpcRequest::new(
            format!("{}.{}", endpoint.service, request.method),
            params,
            id,
        );
        let body = serde_json::to_vec(&rpc)?;

        let url = format!("http://{}{}", endpoint.authority(), self.path);
        let http_request = Request::builder()
            .method("POST")
            .uri(&url)
            .header(headers::CONTENT_TYPE, "application/json")
            .header(headers::TRACE_ID, request.trace_id())
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| BridgeError::internal(format!("failed to build request to {url}: {e}")).with_source(e))?;

        debug!(endpoint = %endpoint.id, %url, method = %rpc.method, trace_id = %request.trace_id(), "Sending JSON-RPC request");
        let response = self.client.request(http_request).await.map_err(|e| {
            BridgeError::connection(format!("request to {} failed: {e}", endpoint.authority())).with_source(e)
        })?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| BridgeError::connection(format!("failed to read response from {}: {e}", endpoint.authority())).with_source(e))?
            .to_bytes();

        let rpc_response: JsonRpcResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                let code = ErrorCode::from_u16(status.as_u16()).unwrap_or(ErrorCode::InternalError);
                return Ok(InternalResponse::failure(code, format!("backend answered HTTP {status}")));
            }
            Err(e) => return Err(e.into()),
        };

        let response = match (rpc_response.error, rpc_response.result) {
            (Some(error), _) => {
                let mut failure = InternalResponse::failure(Self::map_remote_code(error.code), error.message);
                failure.error_details = error.data;
                failure
            }
            (None, Some(result)) => InternalResponse::success(JsonSerializer.encode(&result)?),
            (None, None) => InternalResponse::success(Bytes::new()),
        };
        Ok(response.with_header(headers::TRACE_ID, request.trace_id()))
    }
}
