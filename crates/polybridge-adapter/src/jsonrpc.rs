//! JSON-RPC 2.0 adapter.
//!
//! `"Calculator.add"` is split on the first `.` into service and method. The
//! request `id` travels in the `jsonrpc_id` metadata entry and is echoed on
//! the response; a request without `id` is a notification and becomes a
//! publish-subscribe message.

use crate::adapter::{self, ProtocolAdapter};
use bytes::Bytes;
use polybridge_common::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use polybridge_common::{
    headers, metadata_keys, BridgeError, ExternalProtocol, ExternalRequest, ExternalResponse,
    InternalRequest, InternalResponse, JsonSerializer, MessageType, Result, Serializer,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct JsonRpcAdapter {
    serializer: Arc<dyn Serializer>,
}

impl JsonRpcAdapter {
    pub fn new() -> Self {
        Self {
            serializer: Arc::new(JsonSerializer),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    fn parse(body: &[u8]) -> Result<JsonRpcRequest> {
        let value: Value = serde_json::from_slice(body)?;
        match value {
            Value::Object(_) => {}
            Value::Array(_) => {
                return Err(BridgeError::protocol("JSON-RPC batch requests are not supported"))
            }
            _ => return Err(BridgeError::protocol("JSON-RPC request must be an object")),
        }

        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|e| BridgeError::protocol(format!("invalid JSON-RPC request: {e}")))?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(BridgeError::protocol(format!(
                "unsupported JSON-RPC version {:?}",
                request.jsonrpc
            )));
        }
        Ok(request)
    }

    /// Request id of the exchange, `None` for notifications.
    fn request_id(response: &InternalResponse, original: Option<&ExternalRequest>) -> Option<Value> {
        if let Some(id) = response.metadata.get(metadata_keys::JSONRPC_ID) {
            return Some(id.clone());
        }
        original
            .and_then(|req| Self::parse(&req.body).ok())
            .and_then(|req| req.id)
    }
}

impl Default for JsonRpcAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JsonRpcAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcAdapter")
            .field("content_type", &self.serializer.content_type())
            .finish()
    }
}

/// Splits `service.method`. A name without a usable dot is all method.
fn split_method(qualified: &str) -> (Option<&str>, &str) {
    match qualified.split_once('.') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => {
            (Some(service), method)
        }
        _ => (None, qualified),
    }
}

impl ProtocolAdapter for JsonRpcAdapter {
    fn supported_protocols(&self) -> &[ExternalProtocol] {
        &[ExternalProtocol::JsonRpc]
    }

    fn transform_request(&self, request: &ExternalRequest) -> Result<InternalRequest> {
        adapter::ensure_supported(self, request.protocol)?;
        let rpc = Self::parse(&request.body)?;
        if rpc.method.trim().is_empty() {
            return Err(BridgeError::protocol("JSON-RPC method is empty"));
        }

        let (service, method) = match split_method(&rpc.method) {
            (Some(service), method) => (service.to_string(), method.to_string()),
            (None, method) => {
                let service = adapter::envelope_service(request).ok_or_else(|| {
                    BridgeError::protocol(format!(
                        "JSON-RPC method {:?} does not name a service",
                        rpc.method
                    ))
                })?;
                (service, method.to_string())
            }
        };
        let payload = self.serializer.encode(&rpc.params)?;
        debug!(%service, %method, notification = rpc.is_notification(), "JSON-RPC request mapped");

        let internal = adapter::internal_from(request, service, method, payload)
            .with_header(headers::CONTENT_TYPE, self.serializer.content_type());
        Ok(match rpc.id {
            Some(id) => internal.with_metadata(metadata_keys::JSONRPC_ID, id),
            None => internal.with_message_type(MessageType::PublishSubscribe),
        })
    }

    fn transform_response(
        &self,
        response: &InternalResponse,
        original: Option<&ExternalRequest>,
    ) -> Result<ExternalResponse> {
        adapter::ensure_supported(self, adapter::response_protocol(response, original)?)?;

        let id = Self::request_id(response, original);
        if id.is_none() && response.message_type == MessageType::PublishSubscribe {
            let external = ExternalResponse::new(ExternalProtocol::JsonRpc, 204, Bytes::new());
            return Ok(adapter::finish(external, response));
        }
        let id = id.unwrap_or(Value::Null);

        let rpc = match response.error() {
            Some(err) => JsonRpcResponse::error(id.clone(), JsonRpcError::from(&err)),
            None => JsonRpcResponse::success(id.clone(), self.serializer.decode(&response.payload)?),
        };
        let external = ExternalResponse::new(ExternalProtocol::JsonRpc, 200, serde_json::to_vec(&rpc)?)
            .with_header(headers::CONTENT_TYPE, "application/json")
            .with_metadata(metadata_keys::JSONRPC_ID, id);
        Ok(adapter::finish(external, response))
    }
}
