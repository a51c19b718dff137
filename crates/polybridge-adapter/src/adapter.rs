use polybridge_common::{
    headers, BridgeError, ExternalProtocol, ExternalRequest, ExternalResponse, InternalRequest,
    InternalResponse, Result,
};

/// Bidirectional transform between one family of external protocols and the
/// internal message model.
///
/// Transforms are pure: they either return a fully populated message or a
/// structured `PROTOCOL_ERROR` / `SERIALIZATION_ERROR`.
pub trait ProtocolAdapter: Send + Sync {
    fn supported_protocols(&self) -> &[ExternalProtocol];

    fn supports(&self, protocol: ExternalProtocol) -> bool {
        self.supported_protocols().contains(&protocol)
    }

    fn transform_request(&self, request: &ExternalRequest) -> Result<InternalRequest>;

    /// Renders `response` for the protocol of `original`, or of the
    /// response's recorded source protocol when no original is given.
    fn transform_response(
        &self,
        response: &InternalResponse,
        original: Option<&ExternalRequest>,
    ) -> Result<ExternalResponse>;
}

pub(crate) fn ensure_supported<A>(adapter: &A, protocol: ExternalProtocol) -> Result<()>
where
    A: ProtocolAdapter + ?Sized,
{
    if adapter.supports(protocol) {
        Ok(())
    } else {
        Err(BridgeError::protocol(format!(
            "protocol {protocol} is not handled by this adapter"
        )))
    }
}

/// Protocol a response is rendered in.
pub(crate) fn response_protocol(
    response: &InternalResponse,
    original: Option<&ExternalRequest>,
) -> Result<ExternalProtocol> {
    original
        .map(|req| req.protocol)
        .or(response.source_protocol)
        .ok_or_else(|| BridgeError::protocol("response has no target protocol"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Service named by the envelope field or, failing that, the service header.
pub(crate) fn envelope_service(request: &ExternalRequest) -> Option<String> {
    non_blank(request.service.as_deref())
        .or_else(|| non_blank(request.header(headers::SERVICE_NAME)))
        .map(str::to_string)
}

pub(crate) fn envelope_method(request: &ExternalRequest) -> Option<String> {
    non_blank(request.method.as_deref())
        .or_else(|| non_blank(request.header(headers::METHOD_NAME)))
        .map(str::to_string)
}

/// Internal request carrying the envelope of `external`: headers, metadata,
/// message type, source protocol and an adopted `x-trace-id`.
pub(crate) fn internal_from(
    external: &ExternalRequest,
    service: String,
    method: String,
    payload: impl Into<bytes::Bytes>,
) -> InternalRequest {
    let mut request = InternalRequest::new(service, method, payload)
        .with_source_protocol(external.protocol)
        .with_message_type(external.message_type);
    request.headers = external.headers.clone();
    request.metadata = external.metadata.clone();
    match external.header(headers::TRACE_ID) {
        Some(trace_id) => request.with_trace_id(trace_id),
        None => request,
    }
}

/// Copies response correlation data common to every protocol.
pub(crate) fn finish(mut external: ExternalResponse, response: &InternalResponse) -> ExternalResponse {
    external.message_type = response.message_type;
    for (name, value) in &response.headers {
        external.headers.entry(name.clone()).or_insert_with(|| value.clone());
    }
    if let Some(trace_id) = &response.trace_id {
        external
            .headers
            .insert(headers::TRACE_ID.to_string(), trace_id.clone());
    }
    external
}
