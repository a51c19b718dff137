//! Circuit breaker for one protected call-site.
//!
//! - CLOSED: calls flow through, failures are counted
//! - OPEN: calls are rejected with `SERVICE_UNAVAILABLE` until the timeout elapses
//! - HALF_OPEN: calls flow through, successes are counted towards closing,
//!   any failure reopens
//!
//! All state lives behind one mutex so an outcome is applied as a single
//! transition. Timestamps use `tokio::time::Instant` so paused-clock tests
//! can drive the open timeout.

use polybridge_common::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before closing
    pub success_threshold: u32,
    /// Time spent OPEN before calls are let through again
    #[serde(rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves OPEN to HALF_OPEN once the timeout has elapsed.
    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened_at| opened_at.elapsed())
            .unwrap_or_default();
        if elapsed >= self.config.timeout {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!(breaker = %self.name, "Circuit breaker half-open, probing downstream");
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        warn!(
            breaker = %self.name,
            failures = inner.failure_count,
            timeout_secs = self.config.timeout.as_secs(),
            "Circuit breaker opened"
        );
    }

    /// Current state, applying the timed OPEN → HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Admits or rejects one call.
    ///
    /// Rejection fails fast with `SERVICE_UNAVAILABLE`; the caller must not
    /// invoke the downstream.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                inner.total_rejections += 1;
                debug!(breaker = %self.name, "Circuit open, rejecting call");
                Err(BridgeError::service_unavailable(format!(
                    "circuit breaker '{}' is open",
                    self.name
                )))
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    info!(breaker = %self.name, "Circuit breaker closed, downstream recovered");
                }
            }
            // A call admitted before the breaker opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Forces the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.lock().state)
            .finish()
    }
}
