//! The request pipeline: adapter -> router -> resilient invoker -> adapter.
//!
//! Breakers are kept per routed endpoint, keyed by service and endpoint id.
//! An entry lives as long as the exact endpoint instance it was created for
//! is still in the routing table; removing or re-registering an endpoint
//! starts it with a fresh breaker.

use crate::config::BridgeConfig;
use crate::downstream::Downstream;
use polybridge_adapter::{AdapterSet, RestAdapter};
use polybridge_common::{
    headers, BridgeError, ExternalRequest, ExternalResponse, InternalRequest, InternalResponse,
    Result, ServiceEndpoint,
};
use polybridge_resilience::{CircuitBreaker, CircuitBreakerStats, ResilientInvoker};
use polybridge_router::MessageRouter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

pub struct Bridge {
    config: BridgeConfig,
    adapters: AdapterSet,
    router: Arc<MessageRouter>,
    downstream: Arc<dyn Downstream>,
    invokers: Mutex<InvokerCache>,
}

struct CachedInvoker {
    endpoint: ServiceEndpoint,
    invoker: Arc<ResilientInvoker>,
}

/// `(service, endpoint id)` to the invoker of that endpoint instance.
#[derive(Default)]
struct InvokerCache {
    /// Router generation the entries were last checked against
    generation: u64,
    entries: HashMap<(String, String), CachedInvoker>,
}

impl Bridge {
    /// Builds a bridge with its own router using the configured strategy.
    pub fn new(config: BridgeConfig, downstream: Arc<dyn Downstream>) -> Result<Self> {
        let router = Arc::new(MessageRouter::with_strategy(config.balancer));
        Self::with_router(config, router, downstream)
    }

    /// Builds a bridge around an existing router.
    pub fn with_router(
        config: BridgeConfig,
        router: Arc<MessageRouter>,
        downstream: Arc<dyn Downstream>,
    ) -> Result<Self> {
        let rest = match config.parsed_path_template()? {
            Some(template) => RestAdapter::new().with_path_template(template),
            None => RestAdapter::new(),
        };
        Ok(Self {
            config,
            adapters: AdapterSet::with_rest(rest),
            router,
            downstream,
            invokers: Mutex::new(InvokerCache::default()),
        })
    }

    /// Replaces the protocol adapters.
    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// The invoker guarding `endpoint`, created on first use.
    ///
    /// The breaker is named `service/id`. Endpoints with the same id in
    /// different services never share one.
    ///
    /// # Arguments
    /// * `endpoint` - An endpoint instance taken from the router's table
    pub fn invoker_for(&self, endpoint: &ServiceEndpoint) -> Arc<ResilientInvoker> {
        let mut cache = self.invokers.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut cache);

        let key = (endpoint.service.clone(), endpoint.id.clone());
        if let Some(cached) = cache.entries.get(&key) {
            if cached.endpoint.shares_counter(endpoint) {
                return cached.invoker.clone();
            }
        }

        let name = format!("{}/{}", endpoint.service, endpoint.id);
        debug!(breaker = %name, "Creating circuit breaker");
        let breaker = CircuitBreaker::with_config(name, self.config.circuit_breaker.clone());
        let invoker = Arc::new(ResilientInvoker::new(Arc::new(breaker), self.config.retry.clone()));
        cache.entries.insert(
            key,
            CachedInvoker {
                endpoint: endpoint.clone(),
                invoker: invoker.clone(),
            },
        );
        invoker
    }

    /// Drops entries whose endpoint instance left the routing table.
    fn prune(&self, cache: &mut InvokerCache) {
        let generation = self.router.generation();
        if cache.generation == generation {
            return;
        }
        let table = self.router.snapshot();
        let before = cache.entries.len();
        cache.entries.retain(|_, cached| {
            table
                .values()
                .flatten()
                .any(|routed| routed.shares_counter(&cached.endpoint))
        });
        cache.generation = generation;
        let pruned = before - cache.entries.len();
        if pruned > 0 {
            debug!(pruned, "Dropped breakers of removed endpoints");
        }
    }

    /// Breaker statistics of every routed endpoint used so far, sorted by
    /// breaker name.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut cache = self.invokers.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut cache);
        let mut stats: Vec<_> = cache
            .entries
            .values()
            .map(|cached| cached.invoker.breaker().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Handles one external message. Never fails: errors are rendered in the
    /// protocol of the request.
    pub async fn handle(&self, request: ExternalRequest) -> ExternalResponse {
        self.handle_cancellable(request, &CancellationToken::new()).await
    }

    /// Like [`handle`](Self::handle), abandoning the downstream call when
    /// `token` is cancelled.
    pub async fn handle_cancellable(
        &self,
        request: ExternalRequest,
        token: &CancellationToken,
    ) -> ExternalResponse {
        let span = info_span!(
            "bridge.handle",
            trace_id = field::Empty,
            protocol = %request.protocol
        );
        self.pipeline(request, token).instrument(span).await
    }

    async fn pipeline(&self, request: ExternalRequest, token: &CancellationToken) -> ExternalResponse {
        let mut internal = match self.adapters.transform_request(&request) {
            Ok(internal) => internal,
            Err(err) => {
                warn!(error = %err, "Rejected inbound message");
                return self.render_error(&request, None, &err);
            }
        };
        Span::current().record("trace_id", internal.trace_id());
        if internal.timeout.is_none() {
            internal.timeout = Some(self.config.default_timeout());
        }

        let response = match self.dispatch(&internal, token).await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "Request failed");
                InternalResponse::from_error(&err).correlate(&internal)
            }
        };

        match self.adapters.transform_response(&response, Some(&request)) {
            Ok(external) => external,
            Err(err) => {
                warn!(error = %err, "Failed to render response");
                self.render_error(&request, Some(&internal), &err)
            }
        }
    }

    /// Routes and invokes an internal request.
    ///
    /// The returned response is correlated with `request`. Failed attempts,
    /// including backend application errors, surface as `Err`. The routed
    /// endpoint counts as busy from selection until the last attempt ends.
    pub async fn dispatch(
        &self,
        request: &InternalRequest,
        token: &CancellationToken,
    ) -> Result<InternalResponse> {
        let lease = self.router.route(request)?;
        let endpoint = lease.endpoint();
        let invoker = self.invoker_for(endpoint);
        debug!(
            service = %endpoint.service,
            method = %request.method,
            endpoint = %endpoint.id,
            "Invoking endpoint"
        );

        let downstream = self.downstream.as_ref();
        let response = invoker
            .execute_cancellable(token, request.timeout, |attempt| async move {
                if attempt > 0 {
                    info!(endpoint = %endpoint.id, attempt, "Retrying downstream call");
                }
                downstream.call(endpoint, request).await?.into_result()
            })
            .await?;

        Ok(response.correlate(request))
    }

    fn render_error(
        &self,
        request: &ExternalRequest,
        internal: Option<&InternalRequest>,
        err: &BridgeError,
    ) -> ExternalResponse {
        let mut response = InternalResponse::from_error(err);
        response.source_protocol = Some(request.protocol);
        response.message_type = request.message_type;
        match internal {
            Some(internal) => response = response.correlate(internal),
            None => response.trace_id = request.header(headers::TRACE_ID).map(str::to_string),
        }

        match self.adapters.transform_response(&response, Some(request)) {
            Ok(external) => external,
            Err(render_err) => {
                warn!(error = %render_err, "Falling back to plain error body");
                let body = serde_json::json!({ "error": err.to_json() }).to_string();
                ExternalResponse::new(request.protocol, err.code.http_status(), body)
                    .with_message_type(request.message_type)
                    .with_header(headers::CONTENT_TYPE, "application/json")
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("adapters", &self.adapters)
            .field("services", &self.router.services())
            .finish_non_exhaustive()
    }
}
