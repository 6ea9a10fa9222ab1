//! Exponential backoff with jitter
//!
//! Two users: [`retry_with_backoff`] wraps one-shot startup calls (CRD
//! install), and [`RequeueBackoff`] tracks per-app failure streaks so that
//! `error_policy` can hand the controller a growing requeue delay.
//!
//! # Example
//!
//! ```ignore
//! use shepherd::retry::{retry_with_backoff, RetryConfig};
//!
//! retry_with_backoff(&RetryConfig::with_max_attempts(5), "apply_crd", || async {
//!     crds.patch(name, &params, &Patch::Apply(&crd)).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{error, warn};

/// Backoff parameters
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config with a bounded number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Config used for reconcile requeues: 5s doubling up to `max_delay`
    pub fn requeue(max_delay: Duration) -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based), capped
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay (0.5x to 1.5x of the base), still capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let secs = self.base_delay(attempt).as_secs_f64() * jitter;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute an async operation with exponential backoff and jitter
///
/// Returns the last error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-key failure streaks driving requeue delays
pub struct RequeueBackoff {
    config: RetryConfig,
    attempts: DashMap<String, u32>,
}

impl RequeueBackoff {
    /// Create a tracker using `config` for delay growth
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
        }
    }

    /// Record one more failure for `key` and return the delay to wait
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut entry = self.attempts.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        self.config.delay_for_attempt(attempt)
    }

    /// Forget the failure streak for `key`
    pub fn reset(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Current streak length for `key`
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).map_or(0, |a| *a)
    }
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::requeue(Duration::from_secs(300)))
    }
}
