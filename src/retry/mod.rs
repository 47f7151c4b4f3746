//! Retry engine with exponential backoff and jitter.
//!
//! [`with_retry`] wraps any asynchronous operation. Failures are classified to
//! decide whether another attempt is worthwhile; the error from the final
//! attempt is returned unchanged so callers keep full diagnostic fidelity.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::classifier::shared_classifier;
use crate::error::{AsRawFailure, ErrorClassifier, ErrorKind, RawFailure};

/// Callback invoked before each retry with the upcoming attempt number and the
/// failure that triggered it.
pub type RetryCallback = Arc<dyn Fn(u32, &RawFailure) + Send + Sync>;

/// Fraction of the computed delay used as the jitter range (±10%).
const JITTER_FRACTION: f64 = 0.1;

/// Configuration for retry behaviour with exponential backoff.
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first. Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Perturb each delay by a uniform ±10%.
    pub jitter: bool,
    /// Use a server-provided `Retry-After` for rate-limited failures instead
    /// of the computed delay.
    pub honor_retry_after: bool,
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: true,
            honor_retry_after: false,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("honor_retry_after", &self.honor_retry_after)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts including the first; zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the second attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Upper bound on any single backoff delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Multiplier applied to the delay after each failed attempt.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Spread each delay by up to ten percent either way.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Use a rate-limit response's Retry-After hint, capped at the max delay.
    pub fn with_honor_retry_after(mut self, enabled: bool) -> Self {
        self.honor_retry_after = enabled;
        self
    }

    /// Called after each backoff wait with the attempt about to run and the last failure.
    pub fn with_on_retry(
        mut self,
        callback: impl Fn(u32, &RawFailure) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// The un-jittered delay after failed attempt `attempt` (1-based):
    /// `min(max_delay, base_delay * backoff_factor^(attempt - 1))`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let base_ms = self.base_delay.as_millis() as f64;
        // Cap the exponent; anything past this is far beyond max_delay anyway.
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor > 0.0 {
            self.backoff_factor
        } else {
            1.0
        };

        let delay_ms = (base_ms * factor.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// The delay after failed attempt `attempt`, with jitter applied when
    /// enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }

        let delay_ms = delay.as_millis() as f64;
        let range = delay_ms * JITTER_FRACTION;
        let offset = if range > 0.0 {
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_millis((delay_ms + offset).max(0.0) as u64)
    }

    /// The un-jittered delays between consecutive attempts.
    ///
    /// Has `max_attempts - 1` entries, one per retry.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (1..self.attempt_limit())
            .map(|attempt| self.base_delay_for_attempt(attempt))
            .collect()
    }

    /// Chooses the delay after `attempt` failed with `raw`, honouring
    /// `Retry-After` when configured.
    fn next_delay(&self, attempt: u32, raw: &RawFailure, kind: ErrorKind) -> Duration {
        if self.honor_retry_after && kind == ErrorKind::RateLimit {
            if let RawFailure::Transport(t) = raw {
                if let Some(wait) = t.retry_after() {
                    return wait.min(self.max_delay);
                }
            }
        }
        self.delay_for_attempt(attempt)
    }
}

/// Executes `operation`, retrying transient failures with exponential backoff.
///
/// Attempt 1 runs immediately. After a failure the error is classified; if it
/// is not retryable, or `max_attempts` have been made, that error is returned
/// as-is. Otherwise the engine sleeps for the backoff delay, calls `on_retry`
/// and tries again.
///
/// Only wrap operations that are safe to repeat.
pub async fn with_retry<T, E, F, Fut>(options: &RetryOptions, operation: F) -> Result<T, E>
where
    E: AsRawFailure,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_using(shared_classifier(), options, operation).await
}

/// Like [`with_retry`], but classifies failures with `classifier`.
pub async fn with_retry_using<T, E, F, Fut>(
    classifier: &ErrorClassifier,
    options: &RetryOptions,
    mut operation: F,
) -> Result<T, E>
where
    E: AsRawFailure,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let limit = options.attempt_limit();
    let mut attempt = 1u32;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempts = attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let raw = error.as_raw_failure();
        let details = classifier.classify(&raw);

        if !crate::error::is_retryable(&raw, &details) {
            debug!(
                attempt,
                kind = %details.kind,
                "Failure is not retryable, giving up"
            );
            return Err(error);
        }

        if attempt >= limit {
            warn!(
                attempt,
                max_attempts = limit,
                kind = %details.kind,
                error = %raw,
                "Operation failed after all retry attempts"
            );
            return Err(error);
        }

        let delay = options.next_delay(attempt, &raw, details.kind);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            kind = %details.kind,
            error = %raw,
            "Retrying operation after failure"
        );
        tokio::time::sleep(delay).await;

        attempt += 1;
        if let Some(callback) = &options.on_retry {
            callback(attempt, &raw);
        }
    }
}
