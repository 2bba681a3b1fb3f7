//! Generic retry executor with exponential backoff and jitter.
//!
//! The delay schedule comes from `backoff::ExponentialBackoff`; this module adds the
//! attempt cap, retryability classification and progress reporting on top of it.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, ServiceError};

/// Substrings that mark an unclassified failure as transient.
const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "etimedout",
    "rate limit",
    "429",
    "502",
    "503",
    "econnreset",
    "connection reset",
    "socket hang up",
    "fetch failed",
    "temporarily unavailable",
];

/// Retry configuration for one class of call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_enabled: bool,
    pub retryable_patterns: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_factor: 2.0,
            jitter_enabled: true,
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Single object store operations (upload, delete).
    pub fn storage() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(8))
    }

    /// Per-asset policy inside a batch; bounded so one slow asset can't stall a chunk.
    pub fn batch() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(5))
    }

    /// Vision model calls.
    pub fn ai() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Add message patterns on top of the ones already configured.
    pub fn with_extra_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Decide whether a failure is worth another attempt.
    ///
    /// A structured kind wins; the message is only consulted for errors that carry no
    /// kind or an unclassified one.
    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        match err.kind() {
            Some(kind) if kind.is_transient() => true,
            Some(kind) if kind.is_permanent() => false,
            _ => {
                let message = err.to_string().to_lowercase();
                self.retryable_patterns
                    .iter()
                    .any(|p| message.contains(&p.to_lowercase()))
            }
        }
    }

    /// Delay schedule: `base * factor^(n-1)` capped at `max_delay`, ±10% when jittered.
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(self.backoff_factor)
            .with_randomization_factor(if self.jitter_enabled { 0.1 } else { 0.0 })
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Errors the executor can classify.
pub trait Classify: Display {
    fn kind(&self) -> Option<ErrorKind> {
        None
    }
}

impl Classify for ServiceError {
    fn kind(&self) -> Option<ErrorKind> {
        Some(self.kind)
    }
}

impl Classify for anyhow::Error {}

/// One progress event emitted by the executor.
///
/// Emitted with `error == None` right before each attempt, and with the error set
/// after each failure. `computed_delay` is the sleep that follows a retryable failure
/// and zero otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub computed_delay: Duration,
    pub error: Option<String>,
    /// `None` until the attempt has failed and been classified.
    pub is_retryable: Option<bool>,
}

pub type ProgressFn<'a> = &'a (dyn Fn(&RetryAttempt) + Send + Sync);

/// Run `operation` under `policy`, re-raising the last error once attempts are
/// exhausted or a non-retryable error occurs.
pub async fn with_retry<T, E, F, Fut>(
    operation: F,
    policy: &RetryPolicy,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_counted(operation, policy, on_progress).await.0
}

/// Same as [`with_retry`], also returning how many times `operation` was invoked.
pub async fn with_retry_counted<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    on_progress: Option<ProgressFn<'_>>,
) -> (Result<T, E>, u32)
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut schedule = policy.schedule();
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Some(cb) = on_progress {
            cb(&RetryAttempt {
                attempt_number: attempt,
                max_attempts,
                computed_delay: Duration::ZERO,
                error: None,
                is_retryable: None,
            });
        }

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return (Ok(value), attempt);
            }
            Err(err) => err,
        };

        let retryable = policy.is_retryable(&err);
        let exhausted = attempt >= max_attempts;
        let delay = if retryable && !exhausted {
            schedule.next_backoff().unwrap_or(policy.max_delay)
        } else {
            Duration::ZERO
        };

        if let Some(cb) = on_progress {
            cb(&RetryAttempt {
                attempt_number: attempt,
                max_attempts,
                computed_delay: delay,
                error: Some(err.to_string()),
                is_retryable: Some(retryable),
            });
        }

        if !retryable {
            debug!(attempt, error = %err, "Non-retryable error, giving up");
            return (Err(err), attempt);
        }
        if exhausted {
            error!(attempt, max_attempts, error = %err, "Retries exhausted");
            return (Err(err), attempt);
        }

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retryable error, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
