//! Message types flowing through the bridge.
//!
//! An [`ExternalRequest`] is created by a transport handler, the protocol
//! adapter turns it into an [`InternalRequest`], the downstream produces an
//! [`InternalResponse`] and the adapter renders it as an [`ExternalResponse`].

use crate::error::{BridgeError, ErrorCode, Result};
use crate::protocol::{ExternalProtocol, MessageType};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub type Headers = HashMap<String, String>;
pub type Metadata = HashMap<String, Value>;

/// Well-known header names.
pub mod headers {
    pub const SERVICE_NAME: &str = "x-service-name";
    pub const METHOD_NAME: &str = "x-method-name";
    pub const TRACE_ID: &str = "x-trace-id";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Well-known metadata keys.
pub mod metadata_keys {
    /// HTTP verb of a REST request
    pub const HTTP_METHOD: &str = "http_method";
    /// Request path of a REST request
    pub const PATH: &str = "path";
    /// JSON-RPC request id, echoed on the response
    pub const JSONRPC_ID: &str = "jsonrpc_id";
    /// `text` or `binary` frame for WebSocket/MQTT payloads
    pub const FRAMING: &str = "framing";
    /// MQTT topic
    pub const TOPIC: &str = "topic";
}

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Generates a fresh trace id.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Inbound message in its native wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRequest {
    pub protocol: ExternalProtocol,
    /// Envelope-supplied service name
    pub service: Option<String>,
    /// Envelope-supplied method name
    pub method: Option<String>,
    /// HTTP verb (REST only)
    pub http_method: Option<String>,
    pub message_type: MessageType,
    pub headers: Headers,
    pub body: Bytes,
    pub metadata: Metadata,
}

impl ExternalRequest {
    /// Creates a request as received from a transport handler.
    ///
    /// # Arguments
    /// * `protocol` - Wire protocol the message arrived on
    /// * `body` - Raw message body, left undecoded
    ///
    /// # Returns
    /// A request-response message with no headers, metadata or envelope names
    pub fn new(protocol: ExternalProtocol, body: impl Into<Bytes>) -> Self {
        Self {
            protocol,
            service: None,
            method: None,
            http_method: None,
            message_type: MessageType::default(),
            headers: Headers::new(),
            body: body.into(),
            metadata: Metadata::new(),
        }
    }

    /// Names the target service, taking precedence over headers and paths.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Names the target method, taking precedence over headers and paths.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Records the HTTP verb of a REST request. Case does not matter.
    pub fn with_http_method(mut self, http_method: impl Into<String>) -> Self {
        self.http_method = Some(http_method.into());
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Adds a header, replacing one with the exact same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds transport metadata such as the request `path` or MQTT `topic`
    /// (see [`metadata_keys`]).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Canonical request understood by every backend.
///
/// The trace id is always non-empty: it is generated on construction and
/// [`with_trace_id`](Self::with_trace_id) ignores empty values.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalRequest {
    pub service: String,
    pub method: String,
    pub payload: Bytes,
    pub headers: Headers,
    trace_id: String,
    /// Bound on a single downstream attempt
    pub timeout: Option<Duration>,
    pub source_protocol: Option<ExternalProtocol>,
    pub message_type: MessageType,
    pub metadata: Metadata,
}

impl InternalRequest {
    /// Creates a request with a freshly generated trace id.
    ///
    /// # Arguments
    /// * `service` - Logical service name used for routing
    /// * `method` - Method on that service
    /// * `payload` - Body already encoded by the active serializer
    pub fn new(service: impl Into<String>, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            payload: payload.into(),
            headers: Headers::new(),
            trace_id: generate_trace_id(),
            timeout: None,
            source_protocol: None,
            message_type: MessageType::default(),
            metadata: Metadata::new(),
        }
    }

    /// Never empty.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Adopts an existing trace id. Blank ids are ignored.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        if !trace_id.trim().is_empty() {
            self.trace_id = trace_id;
        }
        self
    }

    /// Bounds each downstream attempt. Requests without one get the
    /// bridge's default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Protocol the response must be rendered in.
    pub fn with_source_protocol(mut self, protocol: ExternalProtocol) -> Self {
        self.source_protocol = Some(protocol);
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// `service.method`, the name used on JSON-RPC backends.
    pub fn qualified_method(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

/// Canonical response from a backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalResponse {
    pub success: bool,
    pub payload: Bytes,
    pub headers: Headers,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    /// Copied from the request so the reverse transform knows its target
    pub source_protocol: Option<ExternalProtocol>,
    pub message_type: MessageType,
    pub metadata: Metadata,
    pub trace_id: Option<String>,
}

impl InternalResponse {
    /// A successful response carrying `payload`, encoded by the active
    /// serializer.
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            payload: payload.into(),
            headers: Headers::new(),
            error_code: None,
            error_message: None,
            error_details: None,
            source_protocol: None,
            message_type: MessageType::default(),
            metadata: Metadata::new(),
            trace_id: None,
        }
    }

    /// A failed response.
    ///
    /// # Arguments
    /// * `code` - Error code reported to the caller
    /// * `message` - Human readable description
    ///
    /// # Returns
    /// A response with `success == false` and an empty payload
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Bytes::new(),
            headers: Headers::new(),
            error_code: Some(code),
            error_message: Some(message.into()),
            error_details: None,
            source_protocol: None,
            message_type: MessageType::default(),
            metadata: Metadata::new(),
            trace_id: None,
        }
    }

    /// A failed response carrying the code, message and details of `err`.
    pub fn from_error(err: &BridgeError) -> Self {
        let mut response = Self::failure(err.code, err.message.clone());
        response.error_details = err.details.clone();
        response
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Copies the correlation fields of `request` onto this response.
    ///
    /// Metadata already present on the response wins over request metadata.
    pub fn correlate(mut self, request: &InternalRequest) -> Self {
        self.source_protocol = request.source_protocol;
        self.message_type = request.message_type;
        self.trace_id = Some(request.trace_id().to_string());
        for (key, value) in &request.metadata {
            self.metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// The structured error carried by a failed response.
    pub fn error(&self) -> Option<BridgeError> {
        if self.success {
            return None;
        }
        let code = self.error_code.unwrap_or(ErrorCode::InternalError);
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| code.reason().to_string());
        let mut err = BridgeError::new(code, message);
        err.details = self.error_details.clone();
        Some(err)
    }

    /// Turns a failed response into its error.
    pub fn into_result(self) -> Result<Self> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Outbound message in the client's protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalResponse {
    pub protocol: ExternalProtocol,
    pub message_type: MessageType,
    pub status_code: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub metadata: Metadata,
}

impl ExternalResponse {
    /// # Arguments
    /// * `protocol` - Protocol the response is sent on
    /// * `status_code` - HTTP-style status; protocols without one still carry it
    /// * `body` - Wire body, already rendered
    pub fn new(protocol: ExternalProtocol, status_code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            protocol,
            message_type: MessageType::default(),
            status_code,
            headers: Headers::new(),
            body: body.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Parses the body as JSON.
    pub fn body_json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
