//! Retry with exponential backoff.
//!
//! Attempt `n` (0-based) that fails with a retryable code waits
//! `initial_delay * multiplier^n`, capped at `max_delay`, before attempt
//! `n + 1`. Non-retryable failures and the failure of the last attempt are
//! returned unchanged. The policy only describes the schedule;
//! [`ResilientInvoker`](crate::ResilientInvoker) drives it.

use polybridge_common::{BridgeError, ErrorCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_codes: HashSet<ErrorCode>,
    /// Scale each delay by a random factor in `0.5..1.5`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
            retryable_codes: HashSet::from([ErrorCode::ConnectionError, ErrorCode::Timeout]),
            jitter: false,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Total attempts, the first one included.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay after the first failed attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Replaces the set of codes that are retried. Everything else fails on
    /// the first attempt.
    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = ErrorCode>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempts actually made; zero is treated as one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, error: &BridgeError) -> bool {
        self.retryable_codes.contains(&error.code)
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let max_secs = self.max_delay.as_secs_f64();
        let mut secs = (self.initial_delay.as_secs_f64() * factor).min(max_secs);
        if self.jitter {
            secs = (secs * rand::rng().random_range(0.5..1.5)).min(max_secs);
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
