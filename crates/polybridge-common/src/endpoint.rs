use crate::protocol::InternalProtocol;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registration record for one backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub service: String,
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: InternalProtocol,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// One addressable backend instance.
///
/// Clones share the active-connection counter, so a count taken through
/// [`acquire`](Self::acquire) on any clone is visible to the load balancer.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    pub protocol: InternalProtocol,
    pub weight: u32,
    active_connections: Arc<AtomicUsize>,
}

impl ServiceEndpoint {
    /// Creates an endpoint speaking `INTERNAL_JSONRPC` with weight 1.
    ///
    /// # Arguments
    /// * `id` - Instance id, unique within its service
    /// * `service` - Service the instance belongs to
    /// * `address` - Host name or IP address
    /// * `port` - TCP port
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            port,
            protocol: InternalProtocol::default(),
            weight: 1,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_protocol(mut self, protocol: InternalProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Share of traffic under weighted round robin; 0 counts as 1.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Seeds the active-connection count.
    pub fn with_active_connections(self, count: usize) -> Self {
        self.active_connections.store(count, Ordering::SeqCst);
        self
    }

    /// Balancing weight, never below 1.
    pub fn effective_weight(&self) -> u32 {
        self.weight.max(1)
    }

    /// Calls currently holding a [`ConnectionGuard`] on this instance.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// `address:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Counts one in-flight call until the guard is dropped.
    pub fn acquire(&self) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counter: self.active_connections.clone(),
        }
    }

    /// Whether `other` is a clone of this instance rather than an equal
    /// registration made separately.
    pub fn shares_counter(&self, other: &ServiceEndpoint) -> bool {
        Arc::ptr_eq(&self.active_connections, &other.active_connections)
    }
}

impl PartialEq for ServiceEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.service == other.service
            && self.address == other.address
            && self.port == other.port
            && self.protocol == other.protocol
            && self.weight == other.weight
    }
}

impl Eq for ServiceEndpoint {}

impl From<EndpointDescriptor> for ServiceEndpoint {
    fn from(desc: EndpointDescriptor) -> Self {
        ServiceEndpoint::new(desc.id, desc.service, desc.address, desc.port)
            .with_protocol(desc.protocol)
            .with_weight(desc.weight)
    }
}

/// Decrements the endpoint's active-connection count on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An endpoint picked by a load balancer, with its connection slot already
/// taken.
///
/// The slot is counted from the moment of selection, so a balancer that
/// reads connection counts sees it before the next pick. Dropping the lease
/// releases the slot.
#[derive(Debug)]
pub struct EndpointLease {
    endpoint: ServiceEndpoint,
    _slot: ConnectionGuard,
}

impl EndpointLease {
    /// Takes a connection slot on `endpoint`.
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        let slot = endpoint.acquire();
        Self {
            endpoint,
            _slot: slot,
        }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Releases the slot and returns the endpoint.
    pub fn into_endpoint(self) -> ServiceEndpoint {
        let EndpointLease { endpoint, .. } = self;
        endpoint
    }
}

impl Deref for EndpointLease {
    type Target = ServiceEndpoint;

    fn deref(&self) -> &ServiceEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_creation() {
        let ep = ServiceEndpoint::new("calc-1", "Calculator", "10.0.0.1", 9001);
        assert_eq!(ep.authority(), "10.0.0.1:9001");
        assert_eq!(ep.weight, 1);
        assert_eq!(ep.protocol, InternalProtocol::InternalJsonrpc);
        assert_eq!(ep.active_connections(), 0);
    }

    #[test]
    fn test_effective_weight_minimum_is_one() {
        let ep = ServiceEndpoint::new("a", "s", "h", 1).with_weight(0);
        assert_eq!(ep.effective_weight(), 1);
    }

    #[test]
    fn test_guard_tracks_in_flight_calls() {
        let ep = ServiceEndpoint::new("a", "s", "h", 1);
        let clone = ep.clone();
        let g1 = ep.acquire();
        let g2 = clone.acquire();
        assert_eq!(ep.active_connections(), 2);
        drop(g1);
        assert_eq!(clone.active_connections(), 1);
        drop(g2);
        assert_eq!(ep.active_connections(), 0);
    }

    #[test]
    fn test_lease_holds_slot_until_dropped() {
        let ep = ServiceEndpoint::new("a", "s", "h", 1);
        let lease = EndpointLease::new(ep.clone());
        assert_eq!(ep.active_connections(), 1);
        assert_eq!(lease.id, "a");

        let released = lease.into_endpoint();
        assert_eq!(ep.active_connections(), 0);
        assert!(released.shares_counter(&ep));
    }

    #[test]
    fn test_equal_registrations_do_not_share_counter() {
        let a = ServiceEndpoint::new("a", "s", "h", 1);
        let b = ServiceEndpoint::new("a", "s", "h", 1);
        assert_eq!(a, b);
        assert!(!a.shares_counter(&b));
        assert!(a.shares_counter(&a.clone()));
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc: EndpointDescriptor = serde_json::from_str(
            r#"{"service":"Calculator","id":"c1","address":"127.0.0.1","port":9001}"#,
        )
        .unwrap();
        assert_eq!(desc.weight, 1);
        let ep = ServiceEndpoint::from(desc);
        assert_eq!(ep.service, "Calculator");
        assert_eq!(ep.protocol, InternalProtocol::InternalJsonrpc);
    }
}
