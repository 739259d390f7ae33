use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::constants::defaults;


/// Seam letting the policy decide which failures are worth retrying
pub trait Retryable {
    fn is_recoverable(&self) -> bool;
}

impl Retryable for crate::error::Error {
    fn is_recoverable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Counters for retry outcomes, shared across calls
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl RetryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retry(&self, succeeded: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::SeqCst)
    }
}

/// Backoff configuration for retriable backend failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            base_delay: defaults::DEFAULT_RETRY_BASE_DELAY,
            max_delay: defaults::DEFAULT_RETRY_MAX_DELAY,
            jitter_factor: defaults::DEFAULT_RETRY_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Disable retries entirely
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }
}

/// Exponential-backoff executor with jitter and an optional overall
/// deadline.
///
/// Recoverability is asked of the error itself via [`Retryable`];
/// deterministic correctness failures therefore never loop here.
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<Arc<RetryMetrics>>,
    deadline: crate::types::Deadline,
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
            deadline: crate::types::Deadline::none(),
        }
    }

    /// Record retry outcomes on shared counters
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RetryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bound all attempts (including backoff sleeps) by a deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: crate::types::Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay * (2_u32.pow(attempt.saturating_sub(1)));
        let delay = std::cmp::min(exp_delay, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted_ms as u64)
        } else {
            delay
        }
    }

    fn record(&self, attempt: u32, succeeded: bool) {
        if attempt > 0 {
            if let Some(ref metrics) = self.metrics {
                metrics.record_retry(succeeded);
            }
        }
    }

    pub async fn execute<F, T, E, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Debug,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    self.record(attempt, true);
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_recoverable() || attempt >= self.config.max_retries {
                        self.record(attempt, false);
                        return Err(e);
                    }

                    attempt += 1;
                    let mut delay = self.calculate_delay(attempt);
                    if let Some(remaining) = self.deadline.remaining() {
                        if remaining.is_zero() {
                            return Err(e);
                        }
                        delay = std::cmp::min(delay, remaining);
                    }

                    warn!(
                        "Retry attempt {}/{} failed: {:?}, retrying in {:?}",
                        attempt, self.config.max_retries, e, delay
                    );

                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
