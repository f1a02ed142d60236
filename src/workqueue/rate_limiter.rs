// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-key retry delays for the work queue.
//!
//! A [`RateLimiter`] decides how long a failed key waits before it is handed to a worker
//! again. Repeated failures of the same key grow the delay exponentially, bounding retry
//! storms, while [`RateLimiter::forget`] resets a key after a successful sync.

use crate::constants::{QUEUE_BACKOFF_MULTIPLIER, QUEUE_BASE_DELAY_MILLIS, QUEUE_MAX_DELAY_SECS};
use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

/// Computes retry delays for work queue keys.
pub trait RateLimiter<K>: Send + Sync {
    /// Record a failure of `key` and return how long to wait before retrying it.
    fn when(&self, key: &K) -> Duration;

    /// Reset the failure history of `key`.
    fn forget(&self, key: &K);

    /// Number of failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Exponential per-key backoff.
///
/// The `n`-th consecutive failure of a key waits `base * multiplier^n`, capped at `max`,
/// with optional randomization (jitter) to prevent thundering herd.
pub struct ItemExponentialRateLimiter<K> {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%, 0.0 disables jitter)
    pub randomization_factor: f64,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialRateLimiter<K> {
    /// Create a limiter with the given bounds and no jitter.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: QUEUE_BACKOFF_MULTIPLIER,
            randomization_factor: 0.0,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Enable ±`factor` randomization of every delay.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
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

impl<K> RateLimiter<K> for ItemExponentialRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        let attempt = {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let count = failures.entry(key.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };

        // Exponent is clamped so the float never overflows to infinity
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX).min(64);
        let backoff = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if backoff.is_finite() && backoff < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(backoff)
        } else {
            self.max_delay
        };

        self.apply_jitter(capped)
    }

    fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// Combines several limiters, waiting for the longest delay any of them asks for.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    /// Combine the given limiters.
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K>
where
    K: Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or_default()
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Default controller rate limiter.
///
/// # Configuration
///
/// - **Base delay**: 5ms
/// - **Max delay**: 1000 seconds
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: none
///
/// # Retry Schedule
///
/// Consecutive failures of one key wait approximately:
///
/// 1. 5ms
/// 2. 10ms
/// 3. 20ms
/// 4. 40ms
/// 5. ...
/// 6. 1000s (capped at max delay after ~18 failures)
#[must_use]
pub fn default_rate_limiter<K>() -> ItemExponentialRateLimiter<K> {
    ItemExponentialRateLimiter::new(
        Duration::from_millis(QUEUE_BASE_DELAY_MILLIS),
        Duration::from_secs(QUEUE_MAX_DELAY_SECS),
    )
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod rate_limiter_tests;
