use polybridge_adapter::PathTemplate;
use polybridge_common::{BridgeError, Result};
use polybridge_resilience::{CircuitBreakerConfig, RetryPolicy};
use polybridge_router::BalancerStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bridge configuration
///
/// ```json
/// {
///   "balancer": "least_connections",
///   "retry": { "max_attempts": 5, "initial_delay_ms": 50 },
///   "circuit_breaker": { "failure_threshold": 3, "timeout_secs": 30 },
///   "default_timeout_ms": 10000,
///   "path_template": "/api/{service}/{method}"
/// }
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub balancer: BalancerStrategy,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-attempt timeout for requests that carry none
    pub default_timeout_ms: u64,
    /// REST path template, disabled when absent
    pub path_template: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            balancer: BalancerStrategy::default(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            default_timeout_ms: 30_000,
            path_template: None,
        }
    }
}

impl BridgeConfig {
    /// Parses a configuration document.
    ///
    /// # Arguments
    /// * `json` - Configuration object; missing fields take their defaults
    ///
    /// # Returns
    /// The parsed configuration, or `BAD_REQUEST` when the document is not
    /// valid JSON or a field has the wrong type
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            BridgeError::bad_request(format!("invalid bridge configuration: {e}")).with_source(e)
        })
    }

    /// Sets the load-balancing strategy used by [`Bridge::new`](crate::Bridge::new).
    pub fn with_balancer(mut self, balancer: BalancerStrategy) -> Self {
        self.balancer = balancer;
        self
    }

    /// Sets the retry policy applied to every endpoint.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the configuration each per-endpoint breaker is created with.
    ///
    /// Only breakers created afterwards pick it up.
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Sets the per-attempt timeout for requests that carry none.
    ///
    /// # Arguments
    /// * `timeout` - Attempt limit, stored with millisecond precision and
    ///   saturated at `u64::MAX` milliseconds
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables REST path matching, e.g. `/api/{service}/{method}`.
    ///
    /// The template is validated when the bridge is built.
    pub fn with_path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = Some(template.into());
        self
    }

    /// `default_timeout_ms` as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Parses `path_template`.
    ///
    /// # Returns
    /// `None` when no template is configured, `BAD_REQUEST` when the template
    /// lacks either placeholder
    pub fn parsed_path_template(&self) -> Result<Option<PathTemplate>> {
        self.path_template.as_deref().map(PathTemplate::parse).transpose()
    }
}
