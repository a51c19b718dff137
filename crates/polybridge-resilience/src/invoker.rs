//! Circuit breaker around a retry loop.
//!
//! Each attempt first asks the breaker for admission. A rejection is terminal
//! and consumes no attempt. An admitted attempt runs under the per-attempt
//! timeout, its outcome is recorded on the breaker, and a retryable failure
//! is retried after the policy's backoff.

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::retry::RetryPolicy;
use polybridge_common::{BridgeError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

fn cancelled() -> BridgeError {
    BridgeError::timeout("request cancelled by caller")
}

async fn bounded<Fut, T>(timeout: Option<Duration>, attempt: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|elapsed| {
            BridgeError::timeout(format!(
                "downstream attempt exceeded {}ms",
                limit.as_millis()
            ))
            .with_source(elapsed)
        })?,
        None => attempt.await,
    }
}

impl ResilientInvoker {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self { breaker, policy }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` with breaker admission, per-attempt `timeout` and
    /// retries. The closure receives the 0-based attempt number.
    pub async fn execute<F, Fut, T>(&self, timeout: Option<Duration>, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(None, timeout, operation).await
    }

    /// Like [`execute`](Self::execute), abandoning the in-flight attempt or
    /// the pending backoff as soon as `token` is cancelled. Cancellation is
    /// not recorded on the breaker.
    pub async fn execute_cancellable<F, Fut, T>(
        &self,
        token: &CancellationToken,
        timeout: Option<Duration>,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(Some(token), timeout, operation).await
    }

    async fn run<F, Fut, T>(
        &self,
        token: Option<&CancellationToken>,
        timeout: Option<Duration>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(cancelled());
            }
            self.breaker.try_acquire()?;

            let call = bounded(timeout, operation(attempt));
            let outcome = match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(cancelled()),
                    outcome = call => outcome,
                },
                None => call.await,
            };

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 0 {
                        debug!(breaker = %self.breaker.name(), attempts = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    err
                }
            };

            if !self.policy.is_retryable(&err) {
                debug!(breaker = %self.breaker.name(), code = err.code.as_u16(), "Failure is not retryable");
                return Err(err);
            }
            if attempt + 1 >= attempts {
                warn!(breaker = %self.breaker.name(), attempts, error = %err, "Retry attempts exhausted");
                return Err(err);
            }
            if self.breaker.state() == CircuitState::Open {
                warn!(breaker = %self.breaker.name(), error = %err, "Circuit opened during retries");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                breaker = %self.breaker.name(),
                attempt = attempt + 1,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }
}
