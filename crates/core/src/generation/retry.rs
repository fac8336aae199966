//! Retry policy and the coordinator that applies it to job attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::metrics;

use super::config::GenerationConfig;
use super::gate::ConcurrencyGate;
use super::lifecycle::JobLifecycle;
use super::types::{GenerationError, JobHandle, JobRequest, JobResult};

/// How the retry policy treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Message matched a retry keyword.
    Transient,
    /// The provider reported the job as failed and task retries are enabled.
    TaskFailure,
    /// The provider queue is full. Retrying would only add load.
    Capacity,
    /// Anything else. Surfaced after one attempt.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::TaskFailure)
    }
}

/// Attempt budget, backoff schedule and retryability rules.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before each retry. The last entry repeats.
    pub delays: Vec<Duration>,
    /// Lowercase substrings marking a message as transient.
    pub keywords: Vec<String>,
    pub retry_task_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
            ..Default::default()
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delays: config
                .retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            keywords: normalize_keywords(&config.retry_keywords),
            retry_task_failures: config.retry_task_failures,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    pub fn with_task_failure_retries(mut self, enabled: bool) -> Self {
        self.retry_task_failures = enabled;
        self
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let slot = (retry.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[slot]
    }

    pub fn classify(&self, err: &GenerationError) -> ErrorClass {
        match err {
            GenerationError::QueueFull(_) => ErrorClass::Capacity,
            GenerationError::TaskFailed { .. } if self.retry_task_failures => {
                ErrorClass::TaskFailure
            }
            GenerationError::TaskFailed { .. } | GenerationError::GateClosed => ErrorClass::Fatal,
            other => {
                let message = other.to_string().to_lowercase();
                if self.keywords.iter().any(|k| message.contains(k.as_str())) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
        }
    }
}

fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Runs job attempts under the gate until one succeeds or the policy gives up.
pub struct RetryCoordinator {
    lifecycle: Arc<JobLifecycle>,
    policy: RetryPolicy,
    gate: Arc<ConcurrencyGate>,
}

impl RetryCoordinator {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        policy: RetryPolicy,
        gate: Arc<ConcurrencyGate>,
    ) -> Self {
        Self {
            lifecycle,
            policy,
            gate,
        }
    }

    /// Produce a result for the request at `index`.
    ///
    /// A permit is held from submission through download of each attempt and
    /// released while backing off. A job left behind by a failed attempt is
    /// cancelled before the next attempt starts, or before returning.
    pub async fn execute(
        &self,
        index: usize,
        request: &JobRequest,
    ) -> Result<JobResult, GenerationError> {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts();
        let mut abandoned: Option<JobHandle> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if let Some(handle) = abandoned.take() {
                self.lifecycle.cancel(&handle).await;
            }

            let outcome = match self.gate.acquire().await {
                Ok(_permit) => {
                    debug!(
                        "Request {} attempt {}/{} holding permit ({} in flight)",
                        index,
                        attempt,
                        max_attempts,
                        self.gate.in_flight()
                    );
                    self.lifecycle.run(index, request).await
                }
                Err(e) => {
                    observe_failure(started);
                    return Err(e);
                }
            };

            let failure = match outcome {
                Ok(result) => {
                    metrics::ATTEMPTS.with_label_values(&["success"]).inc();
                    metrics::GENERATION_DURATION
                        .with_label_values(&["success"])
                        .observe(started.elapsed().as_secs_f64());
                    if attempt > 1 {
                        info!("Request {} succeeded on attempt {}", index, attempt);
                    }
                    return Ok(result);
                }
                Err(failure) => failure,
            };

            abandoned = failure.handle;
            let err = failure.error;

            match self.policy.classify(&err) {
                ErrorClass::Capacity => {
                    metrics::ATTEMPTS.with_label_values(&["capacity"]).inc();
                    metrics::CAPACITY_REJECTIONS.inc();
                    error!(
                        "Request {}: provider queue is full, reduce max_concurrency ({}): {}",
                        index,
                        self.gate.bound(),
                        err
                    );
                    self.abandon(abandoned.take()).await;
                    observe_failure(started);
                    return Err(err);
                }
                ErrorClass::Fatal => {
                    metrics::ATTEMPTS.with_label_values(&["fatal"]).inc();
                    warn!("Request {} failed with non-retryable error: {}", index, err);
                    self.abandon(abandoned.take()).await;
                    observe_failure(started);
                    return Err(err);
                }
                ErrorClass::Transient | ErrorClass::TaskFailure => {
                    metrics::ATTEMPTS.with_label_values(&["retryable"]).inc();

                    if attempt >= max_attempts {
                        self.abandon(abandoned.take()).await;
                        observe_failure(started);
                        let elapsed = started.elapsed();
                        error!(
                            "Request {} failed after {} attempts in {:.1}s: {}",
                            index,
                            attempt,
                            elapsed.as_secs_f64(),
                            err
                        );
                        return Err(GenerationError::RetriesExhausted {
                            attempts: attempt,
                            elapsed,
                            last_error: Box::new(err),
                        });
                    }

                    let delay = self.policy.delay_before_retry(attempt);
                    metrics::RETRIES.inc();
                    warn!(
                        "Request {} attempt {}/{} failed, retrying in {:?}: {}",
                        index, attempt, max_attempts, delay, err
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn abandon(&self, handle: Option<JobHandle>) {
        if let Some(handle) = handle {
            self.lifecycle.cancel(&handle).await;
        }
    }
}

fn observe_failure(started: Instant) {
    metrics::GENERATION_DURATION
        .with_label_values(&["failed"])
        .observe(started.elapsed().as_secs_f64());
}
