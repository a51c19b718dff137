//! In-process handlers resolved by explicit `(service, method)` lookup.

use crate::downstream::Downstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use polybridge_common::{
    BridgeError, InternalRequest, InternalResponse, JsonSerializer, Result, Serializer,
    ServiceEndpoint,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

pub type HandlerFn = Arc<dyn Fn(InternalRequest) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Map from `(service, method)` to a registered handler.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(String, String), HandlerFn>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw handler that sees the whole request and returns the
    /// encoded result payload.
    pub fn register<F, Fut>(&mut self, service: impl Into<String>, method: impl Into<String>, handler: F)
    where
        F: Fn(InternalRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let key = (service.into(), method.into());
        info!(service = %key.0, method = %key.1, "Registered handler");
        self.handlers
            .insert(key, Arc::new(move |request| handler(request).boxed()));
    }

    /// Registers a handler over typed JSON params and result.
    ///
    /// A payload that does not deserialize into `P` fails with `BAD_REQUEST`.
    pub fn register_typed<P, R, F, Fut>(
        &mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        handler: F,
    ) where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(service, method, move |request: InternalRequest| {
            let handler = handler.clone();
            async move {
                let params = JsonSerializer.decode(&request.payload)?;
                let params: P = serde_json::from_value(params).map_err(|e| {
                    BridgeError::bad_request(format!(
                        "invalid params for {}: {e}",
                        request.qualified_method()
                    ))
                })?;
                let result = (*handler)(params).await?;
                JsonSerializer.encode(&serde_json::to_value(result)?)
            }
        });
    }

    pub fn contains(&self, service: &str, method: &str) -> bool {
        self.handlers
            .contains_key(&(service.to_string(), method.to_string()))
    }

    /// Registered `service.method` names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .handlers
            .keys()
            .map(|(service, method)| format!("{service}.{method}"))
            .collect();
        methods.sort();
        methods
    }

    /// Runs the handler registered for `(service, request.method)`.
    pub async fn dispatch(&self, service: &str, request: InternalRequest) -> Result<Bytes> {
        let handler = self
            .handlers
            .get(&(service.to_string(), request.method.clone()))
            .ok_or_else(|| {
                BridgeError::not_found(format!("method {service}.{} is not registered", request.method))
            })?
            .clone();
        (*handler)(request).await
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("methods", &self.methods())
            .finish()
    }
}

/// [`Downstream`] backed by a [`HandlerTable`].
///
/// The handler is looked up under the routed endpoint's service, so routing
/// rules that redirect a request also redirect its handler.
#[derive(Debug, Clone)]
pub struct LocalDownstream {
    table: Arc<HandlerTable>,
}

impl LocalDownstream {
    pub fn new(table: HandlerTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }
}

#[async_trait]
impl Downstream for LocalDownstream {
    async fn call(&self, endpoint: &ServiceEndpoint, request: &InternalRequest) -> Result<InternalResponse> {
        debug!(endpoint = %endpoint.id, method = %request.method, "Dispatching locally");
        match self.table.dispatch(&endpoint.service, request.clone()).await {
            Ok(payload) => Ok(InternalResponse::success(payload)),
            Err(err) => Ok(InternalResponse::from_error(&err)),
        }
    }
}
