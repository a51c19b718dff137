//! Message routing for polybridge.
//!
//! [`MessageRouter`] owns the service → endpoint table, evaluates
//! [`RoutingRule`]s in priority order and delegates the final choice to a
//! [`LoadBalancer`] strategy.

pub mod load_balancer;
pub mod router;
pub mod rule;

pub use load_balancer::{
    BalancerStrategy, LeastConnections, LoadBalancer, RandomBalancer, RoundRobin, WeightedRoundRobin,
};
pub use router::{MessageRouter, RoutingTable};
pub use rule::RoutingRule;
