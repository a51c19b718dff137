//! Message router.
//!
//! The endpoint table and the rule list are immutable snapshots behind
//! [`ArcSwap`]. Every write builds a new snapshot and publishes it with one
//! pointer swap, so a concurrent `route()` sees either the old table or the
//! new one, never a partially applied update.
//!
//! Writes keep the existing instance of an endpoint whose registration is
//! unchanged, so its connection count survives a table refresh. Each
//! publish bumps [`generation`](MessageRouter::generation).

use crate::load_balancer::{BalancerStrategy, LoadBalancer};
use crate::rule::RoutingRule;
use arc_swap::ArcSwap;
use polybridge_common::{
    BridgeError, EndpointLease, InternalRequest, Result, ServiceEndpoint, ServiceRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Service name → endpoints.
pub type RoutingTable = HashMap<String, Vec<ServiceEndpoint>>;

pub struct MessageRouter {
    table: ArcSwap<RoutingTable>,
    /// Sorted by descending priority, registration order within a priority
    rules: ArcSwap<Vec<RoutingRule>>,
    balancer: Arc<dyn LoadBalancer>,
    generation: AtomicU64,
}

impl MessageRouter {
    pub fn new(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::new()),
            rules: ArcSwap::from_pointee(Vec::new()),
            balancer,
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_strategy(strategy: BalancerStrategy) -> Self {
        Self::new(strategy.build())
    }

    pub fn strategy(&self) -> BalancerStrategy {
        self.balancer.strategy()
    }

    /// Resolves the endpoint that should serve `request`.
    ///
    /// The first matching rule (highest priority first) picks the target
    /// service; without a match the request's own service is used. Fails with
    /// `ROUTING_ERROR` when the target has no endpoints.
    ///
    /// The returned lease holds the endpoint's connection slot; keep it for
    /// as long as the call is in flight.
    pub fn route(&self, request: &InternalRequest) -> Result<EndpointLease> {
        let service = self.resolve_service(request);
        if service.is_empty() {
            return Err(BridgeError::routing("request does not name a service"));
        }

        let table = self.table.load();
        let endpoints = table
            .get(&service)
            .filter(|endpoints| !endpoints.is_empty())
            .ok_or_else(|| {
                BridgeError::routing(format!("no endpoints registered for service '{}'", service))
            })?;

        let endpoint = self.balancer.select(&service, endpoints)?;
        debug!(
            trace_id = %request.trace_id(),
            service = %service,
            endpoint = %endpoint.id,
            "Routed request"
        );
        Ok(endpoint)
    }

    /// Target service name after rule evaluation.
    pub fn resolve_service(&self, request: &InternalRequest) -> String {
        let rules = self.rules.load();
        match rules.iter().find(|rule| rule.matches(request)) {
            Some(rule) => {
                let target = rule.target(request);
                debug!(rule = %rule.name(), target = %target, "Routing rule matched");
                target
            }
            None => request.service.clone(),
        }
    }

    /// Adds an endpoint, replacing any endpoint with the same id.
    ///
    /// Re-adding an identical registration keeps the instance already in
    /// the table.
    pub fn add_service_endpoint(&self, service: &str, endpoint: ServiceEndpoint) {
        self.table.rcu(|current| {
            let mut next: RoutingTable = (**current).clone();
            let endpoints = next.entry(service.to_string()).or_default();
            match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
                Some(existing) if *existing == endpoint => {}
                Some(existing) => *existing = endpoint.clone(),
                None => endpoints.push(endpoint.clone()),
            }
            Arc::new(next)
        });
        self.published();
        info!(service, endpoint = %endpoint.id, "Added service endpoint");
    }

    /// Removes an endpoint. Returns whether it was present.
    pub fn remove_service_endpoint(&self, service: &str, endpoint_id: &str) -> bool {
        let mut removed = false;
        let mut service_dropped = false;
        self.table.rcu(|current| {
            let mut next: RoutingTable = (**current).clone();
            removed = false;
            service_dropped = false;
            if let Some(endpoints) = next.get_mut(service) {
                let before = endpoints.len();
                endpoints.retain(|e| e.id != endpoint_id);
                removed = endpoints.len() != before;
                if endpoints.is_empty() {
                    next.remove(service);
                    service_dropped = true;
                }
            }
            Arc::new(next)
        });
        if removed {
            self.published();
            info!(service, endpoint = endpoint_id, "Removed service endpoint");
        }
        if service_dropped {
            self.balancer.forget(service);
        }
        removed
    }

    /// Replaces the whole table in one atomic swap.
    ///
    /// Endpoints equal to ones already routed keep the routed instance.
    pub fn update_routing_table(&self, mut table: RoutingTable) {
        table.retain(|_, endpoints| !endpoints.is_empty());
        let services = table.len();
        let mut dropped: Vec<String> = Vec::new();
        self.table.rcu(|current| {
            let mut next = table.clone();
            for (service, endpoints) in next.iter_mut() {
                let Some(previous) = current.get(service) else {
                    continue;
                };
                for endpoint in endpoints.iter_mut() {
                    if let Some(existing) = previous.iter().find(|p| **p == *endpoint) {
                        *endpoint = existing.clone();
                    }
                }
            }
            dropped = current
                .keys()
                .filter(|service| !next.contains_key(*service))
                .cloned()
                .collect();
            Arc::new(next)
        });
        self.published();
        for service in &dropped {
            self.balancer.forget(service);
        }
        info!(services, dropped = dropped.len(), "Routing table replaced");
    }

    /// Rebuilds the table from the registry for the given services.
    ///
    /// Discovery runs before anything is published; a failed lookup leaves
    /// the current table untouched.
    pub async fn sync_from_registry<I, S>(&self, registry: &dyn ServiceRegistry, services: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = RoutingTable::new();
        for service in services {
            let service = service.as_ref();
            let endpoints = registry.discover(service).await?;
            table.insert(service.to_string(), endpoints);
        }
        self.update_routing_table(table);
        Ok(())
    }

    pub fn register_rule(&self, rule: RoutingRule) {
        let name = rule.name().to_string();
        let priority = rule.priority();
        self.rules.rcu(|current| {
            let mut next: Vec<RoutingRule> = (**current).clone();
            let position = next
                .iter()
                .position(|r| r.priority() < rule.priority())
                .unwrap_or(next.len());
            next.insert(position, rule.clone());
            Arc::new(next)
        });
        info!(rule = %name, priority, "Registered routing rule");
    }

    /// Removes every rule called `name`. Returns whether any was removed.
    pub fn unregister_rule(&self, name: &str) -> bool {
        let mut removed = false;
        self.rules.rcu(|current| {
            let mut next: Vec<RoutingRule> = (**current).clone();
            let before = next.len();
            next.retain(|r| r.name() != name);
            removed = next.len() != before;
            Arc::new(next)
        });
        removed
    }

    /// Rule names in evaluation order.
    pub fn rules(&self) -> Vec<String> {
        self.rules.load().iter().map(|r| r.name().to_string()).collect()
    }

    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.table.load().keys().cloned().collect();
        services.sort();
        services
    }

    pub fn endpoints(&self, service: &str) -> Vec<ServiceEndpoint> {
        self.table.load().get(service).cloned().unwrap_or_default()
    }

    /// The table currently published.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Incremented after every table write. Readers caching per-endpoint
    /// state compare it to know when to revalidate against [`snapshot`](Self::snapshot).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn published(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::with_strategy(BalancerStrategy::default())
    }
}
