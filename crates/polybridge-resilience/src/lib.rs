//! Failure isolation for downstream calls.
//!
//! - [`CircuitBreaker`] - closed / open / half-open state machine
//! - [`RetryPolicy`] - exponential backoff over a retryable error-code set
//! - [`ResilientInvoker`] - the breaker wrapped around the retry loop

pub mod circuit_breaker;
pub mod invoker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use invoker::ResilientInvoker;
pub use retry::RetryPolicy;
