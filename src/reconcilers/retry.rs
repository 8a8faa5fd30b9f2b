// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for reconciliation cycles.
//!
//! A whole repair cycle is replayed when the northbound database rejects one of
//! its transactions because of a concurrent writer. Any other error fails
//! immediately and is left to the next cycle.

use crate::errors::SyncError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Initial retry interval of the conflict policy (10ms)
const CONFLICT_INITIAL_INTERVAL_MILLIS: u64 = 10;

/// Growth factor of the conflict policy
const CONFLICT_MULTIPLIER: f64 = 5.0;

/// Attempts of the conflict policy, the first one included
const CONFLICT_MAX_ATTEMPTS: u32 = 4;

/// Maximum interval between conflict retries (1 second)
const CONFLICT_MAX_INTERVAL_MILLIS: u64 = 1000;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval and grow the current one.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// When and how often a failing operation is replayed.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Upper bound of any single delay
    pub max_interval: Duration,
    /// Delay growth factor
    pub multiplier: f64,
    /// Jitter applied to every delay
    pub randomization_factor: f64,
    /// Which errors are worth another attempt
    pub retryable: fn(&SyncError) -> bool,
}

impl RetryPolicy {
    /// Fresh backoff sequence for one retried operation.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_interval,
            self.max_interval,
            self.multiplier,
            self.randomization_factor,
        )
    }
}

/// Policy replaying an operation on concurrent-modification conflicts only.
///
/// # Retry Schedule
///
/// Four attempts in total, waiting approximately:
///
/// 1. 10ms
/// 2. 50ms
/// 3. 250ms
#[must_use]
pub fn conflict_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: CONFLICT_MAX_ATTEMPTS,
        initial_interval: Duration::from_millis(CONFLICT_INITIAL_INTERVAL_MILLIS),
        max_interval: Duration::from_millis(CONFLICT_MAX_INTERVAL_MILLIS),
        multiplier: CONFLICT_MULTIPLIER,
        randomization_factor: RANDOMIZATION_FACTOR,
        retryable: SyncError::is_conflict,
    }
}

/// Run `operation`, replaying it while `policy` deems the error retryable.
///
/// # Errors
///
/// Returns error if:
/// - Non-retryable error encountered
/// - All attempts exhausted
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
    operation_name: &str,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut backoff = policy.backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !(policy.retryable)(&e) {
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Retries exhausted, giving up"
                    );
                    return Err(e);
                }

                let duration = backoff.next_backoff();
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retry_after = ?duration,
                    error = %e,
                    "Retryable error, will retry"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
