//! Envelope adapter for message-oriented protocols (WebSocket, MQTT).
//!
//! Payloads pass through untouched. Service and method must be supplied by
//! the envelope; nothing is inferred from the payload.

use crate::adapter::{self, ProtocolAdapter};
use polybridge_common::{
    metadata_keys, BridgeError, ExternalProtocol, ExternalRequest, ExternalResponse,
    InternalRequest, InternalResponse, Metadata, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// Frame kind of a WebSocket message or MQTT payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    Text,
    Binary,
}

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Framing::Text => "text",
            Framing::Binary => "binary",
        }
    }

    /// Valid UTF-8 is text, anything else binary.
    pub fn infer(payload: &[u8]) -> Self {
        if std::str::from_utf8(payload).is_ok() {
            Framing::Text
        } else {
            Framing::Binary
        }
    }

    /// Reads the `framing` metadata entry, if any.
    pub fn from_metadata(metadata: &Metadata) -> Result<Option<Self>> {
        match metadata.get(metadata_keys::FRAMING) {
            None => Ok(None),
            Some(Value::String(s)) if s == "text" => Ok(Some(Framing::Text)),
            Some(Value::String(s)) if s == "binary" => Ok(Some(Framing::Binary)),
            Some(other) => Err(BridgeError::protocol(format!(
                "unknown framing {other}, expected \"text\" or \"binary\""
            ))),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeAdapter;

impl EnvelopeAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn carry(external: ExternalResponse, metadata: &Metadata, key: &str) -> ExternalResponse {
    match metadata.get(key) {
        Some(value) => external.with_metadata(key, value.clone()),
        None => external,
    }
}

impl ProtocolAdapter for EnvelopeAdapter {
    fn supported_protocols(&self) -> &[ExternalProtocol] {
        &[ExternalProtocol::WebSocket, ExternalProtocol::Mqtt]
    }

    fn transform_request(&self, request: &ExternalRequest) -> Result<InternalRequest> {
        adapter::ensure_supported(self, request.protocol)?;
        let service = adapter::envelope_service(request).ok_or_else(|| {
            BridgeError::protocol(format!("{} envelope does not name a service", request.protocol))
        })?;
        let method = adapter::envelope_method(request).ok_or_else(|| {
            BridgeError::protocol(format!("{} envelope does not name a method", request.protocol))
        })?;

        let framing = match Framing::from_metadata(&request.metadata)? {
            Some(framing) => framing,
            None => Framing::infer(&request.body),
        };
        debug!(%service, %method, protocol = %request.protocol, %framing, "Envelope request mapped");

        Ok(adapter::internal_from(request, service, method, request.body.clone())
            .with_metadata(metadata_keys::FRAMING, framing.as_str()))
    }

    fn transform_response(
        &self,
        response: &InternalResponse,
        original: Option<&ExternalRequest>,
    ) -> Result<ExternalResponse> {
        let protocol = adapter::response_protocol(response, original)?;
        adapter::ensure_supported(self, protocol)?;

        let external = match response.error() {
            Some(err) => {
                let mut envelope = json!({ "error": err.to_json() });
                if let (Some(trace_id), Some(obj)) = (&response.trace_id, envelope.as_object_mut()) {
                    obj.insert("trace_id".to_string(), json!(trace_id));
                }
                ExternalResponse::new(protocol, err.code.as_u16(), serde_json::to_vec(&envelope)?)
                    .with_metadata(metadata_keys::FRAMING, Framing::Text.as_str())
            }
            None => {
                let framing = match Framing::from_metadata(&response.metadata)? {
                    Some(framing) => framing,
                    None => Framing::infer(&response.payload),
                };
                ExternalResponse::new(protocol, 200, response.payload.clone())
                    .with_metadata(metadata_keys::FRAMING, framing.as_str())
            }
        };

        let external = carry(external, &response.metadata, metadata_keys::TOPIC);
        Ok(adapter::finish(external, response))
    }
}
