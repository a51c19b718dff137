use async_trait::async_trait;
use polybridge_common::{InternalRequest, InternalResponse, Result, ServiceEndpoint};

/// The actual call to a backend endpoint.
///
/// Transport failures are `Err` (typically `CONNECTION_ERROR` or `TIMEOUT`).
/// A backend that answered with an application error returns
/// `Ok(response)` with `success == false`; the invoker treats both as a
/// failed attempt carrying the response's error code.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, endpoint: &ServiceEndpoint, request: &InternalRequest) -> Result<InternalResponse>;
}
