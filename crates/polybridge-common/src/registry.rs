//! Service registry collaborator.
//!
//! The registry is the source of truth for which endpoints exist. The router
//! only consumes [`ServiceRegistry::discover`]; storage and discovery
//! mechanics belong to the implementation.

use crate::endpoint::{EndpointDescriptor, ServiceEndpoint};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Endpoints currently registered for `service`. Unknown services yield
    /// an empty list.
    async fn discover(&self, service: &str) -> Result<Vec<ServiceEndpoint>>;

    async fn register(&self, endpoint: EndpointDescriptor) -> Result<()>;
}

/// Process-local registry backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, Vec<EndpointDescriptor>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes one endpoint. Returns whether it was registered.
    pub async fn deregister(&self, service: &str, endpoint_id: &str) -> bool {
        let mut services = self.services.write().await;
        let Some(endpoints) = services.get_mut(service) else {
            return false;
        };
        let before = endpoints.len();
        endpoints.retain(|e| e.id != endpoint_id);
        let removed = endpoints.len() != before;
        if endpoints.is_empty() {
            services.remove(service);
        }
        removed
    }

    /// Names of all services with at least one endpoint.
    pub async fn services(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn discover(&self, service: &str) -> Result<Vec<ServiceEndpoint>> {
        let services = self.services.read().await;
        Ok(services
            .get(service)
            .map(|eps| eps.iter().cloned().map(ServiceEndpoint::from).collect())
            .unwrap_or_default())
    }

    async fn register(&self, endpoint: EndpointDescriptor) -> Result<()> {
        if endpoint.service.is_empty() || endpoint.id.is_empty() {
            return Err(BridgeError::bad_request(
                "endpoint registration requires a service name and an endpoint id",
            ));
        }
        debug!(service = %endpoint.service, endpoint = %endpoint.id, "Registering endpoint");

        let mut services = self.services.write().await;
        let endpoints = services.entry(endpoint.service.clone()).or_default();
        // Re-registering an id replaces the previous record.
        endpoints.retain(|e| e.id != endpoint.id);
        endpoints.push(endpoint);
        Ok(())
    }
}
