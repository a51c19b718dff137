//! Endpoint selection strategies.
//!
//! Every strategy selects from the endpoint list the router resolved for one
//! service. Counters are kept per service name and advanced inside a single
//! critical section, so concurrent selections never reuse a stale index.
//!
//! A selection is returned as an [`EndpointLease`]: the endpoint's connection
//! slot is taken before `select` returns and held until the lease is dropped.

use polybridge_common::{BridgeError, EndpointLease, Result, ServiceEndpoint};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Picks one endpoint out of a service's endpoint list.
pub trait LoadBalancer: Send + Sync {
    /// Fails with `ROUTING_ERROR` on an empty list.
    fn select(&self, service: &str, endpoints: &[ServiceEndpoint]) -> Result<EndpointLease>;

    fn strategy(&self) -> BalancerStrategy;

    /// Drops any per-service state kept for `service`.
    fn forget(&self, _service: &str) {}
}

/// Configurable strategy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerStrategy {
    #[default]
    RoundRobin,
    Random,
    WeightedRoundRobin,
    LeastConnections,
}

impl BalancerStrategy {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            BalancerStrategy::RoundRobin => Arc::new(RoundRobin::new()),
            BalancerStrategy::Random => Arc::new(RandomBalancer),
            BalancerStrategy::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
            BalancerStrategy::LeastConnections => Arc::new(LeastConnections::new()),
        }
    }
}

fn ensure_not_empty(service: &str, endpoints: &[ServiceEndpoint]) -> Result<()> {
    if endpoints.is_empty() {
        return Err(BridgeError::routing(format!(
            "no endpoints available for service '{}'",
            service
        )));
    }
    Ok(())
}

/// Per-service monotonically increasing cursors.
#[derive(Debug, Default)]
struct Cursors {
    positions: Mutex<HashMap<String, u64>>,
}

impl Cursors {
    /// Returns the current position for `service` and advances it.
    fn advance(&self, service: &str) -> u64 {
        let mut positions = self.positions.lock().unwrap_or_else(PoisonError::into_inner);
        let position = positions.entry(service.to_string()).or_insert(0);
        let current = *position;
        *position = position.wrapping_add(1);
        current
    }

    fn remove(&self, service: &str) {
        self.positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.positions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Cycles through the endpoint list in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: Cursors,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, service: &str, endpoints: &[ServiceEndpoint]) -> Result<EndpointLease> {
        ensure_not_empty(service, endpoints)?;
        let index = (self.cursors.advance(service) % endpoints.len() as u64) as usize;
        let endpoint = &endpoints[index];
        debug!(service, endpoint = %endpoint.id, index, "round robin selection");
        Ok(EndpointLease::new(endpoint.clone()))
    }

    fn strategy(&self) -> BalancerStrategy {
        BalancerStrategy::RoundRobin
    }

    fn forget(&self, service: &str) {
        self.cursors.remove(service);
    }
}

/// Uniform random selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, service: &str, endpoints: &[ServiceEndpoint]) -> Result<EndpointLease> {
        ensure_not_empty(service, endpoints)?;
        let index = rand::rng().random_range(0..endpoints.len());
        Ok(EndpointLease::new(endpoints[index].clone()))
    }

    fn strategy(&self) -> BalancerStrategy {
        BalancerStrategy::Random
    }
}

/// Round robin over virtual slots, `weight` slots per endpoint.
///
/// Endpoints `A(2), B(1)` produce the repeating sequence `A, A, B`.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    cursors: Cursors,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select(&self, service: &str, endpoints: &[ServiceEndpoint]) -> Result<EndpointLease> {
        ensure_not_empty(service, endpoints)?;
        let total: u64 = endpoints.iter().map(|e| u64::from(e.effective_weight())).sum();
        let mut slot = self.cursors.advance(service) % total;

        for endpoint in endpoints {
            let weight = u64::from(endpoint.effective_weight());
            if slot < weight {
                debug!(service, endpoint = %endpoint.id, "weighted round robin selection");
                return Ok(EndpointLease::new(endpoint.clone()));
            }
            slot -= weight;
        }

        // slot < total always lands inside the loop
        Err(BridgeError::internal("weighted slot out of range"))
    }

    fn strategy(&self) -> BalancerStrategy {
        BalancerStrategy::WeightedRoundRobin
    }

    fn forget(&self, service: &str) {
        self.cursors.remove(service);
    }
}

/// Endpoint with the fewest in-flight calls, first in list order on ties.
///
/// The scan and the slot it reserves happen under one lock, so two
/// selections made back to back see each other's lease.
#[derive(Debug, Default)]
pub struct LeastConnections {
    gate: Mutex<()>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, service: &str, endpoints: &[ServiceEndpoint]) -> Result<EndpointLease> {
        ensure_not_empty(service, endpoints)?;
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let endpoint = endpoints
            .iter()
            .min_by_key(|e| e.active_connections())
            .ok_or_else(|| BridgeError::routing(format!("no endpoints for '{}'", service)))?;
        debug!(
            service,
            endpoint = %endpoint.id,
            active = endpoint.active_connections(),
            "least connections selection"
        );
        Ok(EndpointLease::new(endpoint.clone()))
    }

    fn strategy(&self) -> BalancerStrategy {
        BalancerStrategy::LeastConnections
    }
}
