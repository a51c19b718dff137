//! REST adapter.
//!
//! Service and method are resolved from the envelope fields, then the
//! `x-service-name` / `x-method-name` header pair, then the configured
//! [`PathTemplate`] applied to the `path` metadata entry.
//!
//! Bodies in both directions go through the adapter's [`Serializer`]
//! (JSON unless configured otherwise). The request's HTTP verb picks the
//! success status:
//!
//! - publish-subscribe: 202, no body
//! - `HEAD`: 200, no body
//! - empty payload, or `DELETE` answered with `null`: 204, no body
//! - anything else: 200 with the decoded payload

use crate::adapter::{self, ProtocolAdapter};
use bytes::Bytes;
use polybridge_common::{
    headers, metadata_keys, BridgeError, ExternalProtocol, ExternalRequest, ExternalResponse,
    InternalRequest, InternalResponse, JsonSerializer, MessageType, Result, Serializer,
};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Service,
    Method,
}

/// Path pattern such as `/api/{service}/{method}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub const DEFAULT: &'static str = "/api/{service}/{method}";

    /// Parses a template. Both `{service}` and `{method}` must appear exactly once.
    pub fn parse(template: &str) -> Result<Self> {
        let segments: Vec<Segment> = template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "{service}" => Segment::Service,
                "{method}" => Segment::Method,
                other => Segment::Literal(other.to_string()),
            })
            .collect();

        let count = |wanted: &Segment| segments.iter().filter(|s| *s == wanted).count();
        if count(&Segment::Service) != 1 || count(&Segment::Method) != 1 {
            return Err(BridgeError::bad_request(format!(
                "path template {template:?} must contain {{service}} and {{method}} once each"
            )));
        }
        if segments
            .iter()
            .any(|s| matches!(s, Segment::Literal(l) if l.contains('{') || l.contains('}')))
        {
            return Err(BridgeError::bad_request(format!(
                "path template {template:?} has an unknown placeholder"
            )));
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Extracts `(service, method)` from a request path. Query strings are ignored.
    pub fn extract(&self, path: &str) -> Option<(String, String)> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut service = None;
        let mut method = None;
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Service => service = Some(part.to_string()),
                Segment::Method => method = Some(part.to_string()),
            }
        }
        Some((service?, method?))
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            raw: Self::DEFAULT.to_string(),
            segments: vec![
                Segment::Literal("api".to_string()),
                Segment::Service,
                Segment::Method,
            ],
        }
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone)]
pub struct RestAdapter {
    serializer: Arc<dyn Serializer>,
    template: Option<PathTemplate>,
}

impl RestAdapter {
    pub fn new() -> Self {
        Self {
            serializer: Arc::new(JsonSerializer),
            template: None,
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_path_template(mut self, template: PathTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn path_template(&self) -> Option<&PathTemplate> {
        self.template.as_ref()
    }

    fn from_path(&self, request: &ExternalRequest) -> Option<(String, String)> {
        let template = self.template.as_ref()?;
        let path = request.metadata.get(metadata_keys::PATH)?.as_str()?;
        template.extract(path)
    }

    /// Verb recorded on the response, falling back to the original request's.
    fn http_method(response: &InternalResponse, original: Option<&ExternalRequest>) -> String {
        response
            .metadata
            .get(metadata_keys::HTTP_METHOD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| original.and_then(|r| r.http_method.clone()))
            .unwrap_or_else(|| "POST".to_string())
            .to_ascii_uppercase()
    }

    fn body(&self, status: u16, value: &Value) -> Result<ExternalResponse> {
        Ok(ExternalResponse::new(ExternalProtocol::Rest, status, self.serializer.encode(value)?)
            .with_header(headers::CONTENT_TYPE, self.serializer.content_type()))
    }

    fn resolve_target(&self, request: &ExternalRequest) -> Result<(String, String)> {
        let from_path = self.from_path(request);
        let service = adapter::envelope_service(request)
            .or_else(|| from_path.as_ref().map(|(s, _)| s.clone()))
            .ok_or_else(|| BridgeError::protocol("REST request does not name a service"))?;
        let method = adapter::envelope_method(request)
            .or_else(|| from_path.map(|(_, m)| m))
            .ok_or_else(|| BridgeError::protocol("REST request does not name a method"))?;
        Ok((service, method))
    }
}

impl Default for RestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RestAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestAdapter")
            .field("content_type", &self.serializer.content_type())
            .field("template", &self.template)
            .finish()
    }
}

impl ProtocolAdapter for RestAdapter {
    fn supported_protocols(&self) -> &[ExternalProtocol] {
        &[ExternalProtocol::Rest]
    }

    fn transform_request(&self, request: &ExternalRequest) -> Result<InternalRequest> {
        adapter::ensure_supported(self, request.protocol)?;
        let (service, method) = self.resolve_target(request)?;

        let body = self.serializer.decode(&request.body)?;
        let payload = self.serializer.encode(&body)?;

        let http_method = request
            .http_method
            .as_deref()
            .unwrap_or("POST")
            .to_ascii_uppercase();
        debug!(%service, %method, %http_method, "REST request mapped");

        Ok(adapter::internal_from(request, service, method, payload)
            .with_header(headers::CONTENT_TYPE, self.serializer.content_type())
            .with_metadata(metadata_keys::HTTP_METHOD, http_method))
    }

    fn transform_response(
        &self,
        response: &InternalResponse,
        original: Option<&ExternalRequest>,
    ) -> Result<ExternalResponse> {
        adapter::ensure_supported(self, adapter::response_protocol(response, original)?)?;

        let verb = Self::http_method(response, original);
        let empty = || ExternalResponse::new(ExternalProtocol::Rest, 204, Bytes::new());

        let external = match response.error() {
            Some(err) => self.body(err.code.http_status(), &json!({ "error": err.to_json() }))?,
            None if response.message_type == MessageType::PublishSubscribe => {
                ExternalResponse::new(ExternalProtocol::Rest, 202, Bytes::new())
            }
            None if verb == "HEAD" => ExternalResponse::new(ExternalProtocol::Rest, 200, Bytes::new()),
            None if response.payload.is_empty() => empty(),
            None => {
                let value = self.serializer.decode(&response.payload)?;
                if verb == "DELETE" && value.is_null() {
                    empty()
                } else {
                    self.body(200, &value)?
                }
            }
        };

        let external = external.with_metadata(metadata_keys::HTTP_METHOD, verb);
        Ok(adapter::finish(external, response))
    }
}
