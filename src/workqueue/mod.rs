// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deduplicating, rate-limited work queue.
//!
//! The queue decouples event ingestion from processing. Informer callbacks [`add`] keys,
//! workers [`get`] them, sync, and report back with [`done`] plus either [`forget`] (on
//! success) or [`add_rate_limited`] (on failure).
//!
//! # Guarantees
//!
//! - A key is queued at most once, however many times it is added before a worker takes it.
//! - A key is never handed to two workers at the same time. Adding a key that is being
//!   processed marks it dirty; it is queued again when the current worker calls [`done`].
//! - After [`shut_down`], new adds are ignored, queued keys are still handed out, and
//!   [`get`] returns `None` once the queue is empty.
//!
//! [`add`]: WorkQueue::add
//! [`get`]: WorkQueue::get
//! [`done`]: WorkQueue::done
//! [`forget`]: WorkQueue::forget
//! [`add_rate_limited`]: WorkQueue::add_rate_limited
//! [`shut_down`]: WorkQueue::shut_down

pub mod rate_limiter;

pub use rate_limiter::{
    default_rate_limiter, ItemExponentialRateLimiter, MaxOfRateLimiter, RateLimiter,
};

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct State<K> {
    /// Keys waiting for a worker, in FIFO order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    /// Wakes workers blocked in `get`
    work_available: Notify,
    /// Wakes `shut_down_with_drain` when processing empties
    drained: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
}

/// Work queue keyed by `K`. Cloning yields another handle to the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue using the default exponential rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limiter(Box::new(default_rate_limiter()))
    }

    /// Create a queue with a custom rate limiter.
    #[must_use]
    pub fn with_rate_limiter(rate_limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                work_available: Notify::new(),
                drained: Notify::new(),
                rate_limiter,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        // Every critical section leaves the state consistent, so a poisoned lock is still usable
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue `key` for processing.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.work_available.notify_one();
    }

    /// Queue `key` after `delay` has elapsed.
    ///
    /// Must be called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queue `key` after the delay its failure history calls for.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.rate_limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.inner.rate_limiter.forget(key);
    }

    /// Number of times `key` was rate-limited since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and empty.
    ///
    /// The returned key is marked as processing until [`WorkQueue::done`] is called.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.work_available.notified();
            tokio::pin!(notified);
            // Register before inspecting the state so a concurrent add or shutdown is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed, requeueing it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        let requeued = state.dirty.contains(key);
        if requeued {
            state.queue.push_back(key.clone());
        }
        let drained = state.processing.is_empty();
        drop(state);

        if requeued {
            self.inner.work_available.notify_one();
        }
        if drained {
            self.inner.drained.notify_waiters();
        }
    }

    /// Number of keys waiting for a worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no keys are waiting for a worker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is currently held by a worker.
    #[must_use]
    pub fn is_processing(&self, key: &K) -> bool {
        self.state().processing.contains(key)
    }

    /// Stop accepting keys and wake every waiting worker.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.work_available.notify_waiters();
    }

    /// Shut down and wait until no key is being processed any more.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.state().processing.is_empty() {
                return;
            }
            drained.await;
        }
    }

    /// Whether [`WorkQueue::shut_down`] was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
