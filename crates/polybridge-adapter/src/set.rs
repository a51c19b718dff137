use crate::adapter::{self, ProtocolAdapter};
use crate::envelope::EnvelopeAdapter;
use crate::jsonrpc::JsonRpcAdapter;
use crate::rest::RestAdapter;
use polybridge_common::{
    BridgeError, ExternalProtocol, ExternalRequest, ExternalResponse, InternalRequest,
    InternalResponse, Result,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Explicit protocol tag -> adapter table.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<ExternalProtocol, Arc<dyn ProtocolAdapter>>,
}

impl AdapterSet {
    /// An empty set; every protocol fails until an adapter is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// REST, JSON-RPC, WebSocket and MQTT with the default adapters.
    pub fn standard() -> Self {
        Self::with_rest(RestAdapter::new())
    }

    /// Standard set with a custom REST adapter.
    pub fn with_rest(rest: RestAdapter) -> Self {
        Self::new()
            .with_adapter(Arc::new(rest))
            .with_adapter(Arc::new(JsonRpcAdapter::new()))
            .with_adapter(Arc::new(EnvelopeAdapter::new()))
    }

    /// Registers `adapter` for every protocol it supports, replacing earlier
    /// registrations.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        for protocol in adapter.supported_protocols() {
            self.adapters.insert(*protocol, adapter.clone());
        }
    }

    pub fn supports(&self, protocol: ExternalProtocol) -> bool {
        self.adapters.contains_key(&protocol)
    }

    pub fn get(&self, protocol: ExternalProtocol) -> Result<&Arc<dyn ProtocolAdapter>> {
        self.adapters
            .get(&protocol)
            .ok_or_else(|| BridgeError::protocol(format!("no adapter registered for {protocol}")))
    }

    pub fn transform_request(&self, request: &ExternalRequest) -> Result<InternalRequest> {
        self.get(request.protocol)?.transform_request(request)
    }

    pub fn transform_response(
        &self,
        response: &InternalResponse,
        original: Option<&ExternalRequest>,
    ) -> Result<ExternalResponse> {
        let protocol = adapter::response_protocol(response, original)?;
        self.get(protocol)?.transform_response(response, original)
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<_> = self.adapters.keys().map(|p| p.as_str()).collect();
        protocols.sort_unstable();
        f.debug_struct("AdapterSet").field("protocols", &protocols).finish()
    }
}
