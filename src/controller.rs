// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic worker runtime shared by both controllers.
//!
//! A controller is a [`SyncHandler`]: it owns a [`WorkQueue`] of [`ObjectKey`]s, knows how to
//! sync one key, and can re-enqueue everything it cares about on a periodic resync.
//! [`run_controller`] drives a handler:
//!
//! 1. Wait for the Service and Secret stores to complete their initial list
//! 2. Spawn `workers` tasks, each looping `get → sync → forget | add_rate_limited → done`
//! 3. Re-enqueue interesting objects every resync interval
//! 4. On shutdown, close the queue and wait for in-flight syncs to finish

use crate::context::Stores;
use crate::errors::SyncError;
use crate::metrics;
use crate::workqueue::WorkQueue;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, warn};

/// Work queue key identifying an object by namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an object, taken from its metadata.
    pub fn for_resource<K: kube::Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    /// Namespace of the key, empty for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = SyncError;

    /// Parse `namespace/name`, or a bare `name` for cluster-scoped objects.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            None if !s.is_empty() => Ok(Self {
                namespace: None,
                name: s.to_string(),
            }),
            _ => Err(SyncError::InvalidKey(s.to_string())),
        }
    }
}

/// Typed informer notification for one resource kind.
#[derive(Debug)]
pub enum ResourceEvent<'a, K> {
    /// The object was added or modified
    Applied(&'a K),
    /// The object was deleted; carries its last known state
    Deleted(&'a K),
}

// Manual impls: only the reference is copied, so `K` needs no bounds.
impl<K> Clone for ResourceEvent<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for ResourceEvent<'_, K> {}

/// A controller driven by [`run_controller`].
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    /// Controller name used in logs and metric labels
    const NAME: &'static str;

    /// Stores that must be synced before the first sync runs.
    fn stores(&self) -> &Stores;

    /// Queue the handler's informer callbacks feed.
    fn queue(&self) -> &WorkQueue<ObjectKey>;

    /// Bring the object behind `key` to its desired state.
    ///
    /// # Errors
    ///
    /// Any error requeues the key with backoff.
    async fn sync(&self, key: &ObjectKey) -> Result<(), SyncError>;

    /// Enqueue every cached object the handler cares about. Returns the number of keys.
    fn resync(&self) -> usize;
}

/// Take one key from the handler's queue and sync it.
///
/// Returns `false` once the queue is shut down and empty.
pub async fn process_next_item<H: SyncHandler>(handler: &H) -> bool {
    let queue = handler.queue();
    let Some(key) = queue.get().await else {
        return false;
    };

    let start = std::time::Instant::now();
    match handler.sync(&key).await {
        Ok(()) => {
            queue.forget(&key);
            metrics::record_sync_success(H::NAME, start.elapsed());
            debug!(controller = H::NAME, key = %key, "Synced");
        }
        Err(e) => {
            let requeues = queue.num_requeues(&key);
            if e.is_retryable() {
                debug!(
                    controller = H::NAME,
                    key = %key,
                    requeues,
                    error = %e,
                    "Transient sync failure, requeueing with backoff"
                );
            } else {
                warn!(
                    controller = H::NAME,
                    key = %key,
                    requeues,
                    error = %e,
                    "Sync failed, requeueing with backoff"
                );
            }
            metrics::record_sync_error(H::NAME, start.elapsed());
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
    metrics::set_workqueue_depth(H::NAME, queue.len());
    true
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a shutdown request
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn next_resync(resync: Option<&mut Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run a controller until `shutdown` becomes `true`.
///
/// # Errors
///
/// Returns an error if an informer stops before its store synced, or if a worker task
/// exits while the controller is still running.
pub async fn run_controller<H: SyncHandler>(
    handler: Arc<H>,
    workers: usize,
    resync_interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(controller = H::NAME, "Starting controller");

    debug!(controller = H::NAME, "Waiting for informer caches to sync");
    tokio::select! {
        synced = handler.stores().wait_until_ready() => {
            synced.with_context(|| format!("{} informer stopped before its cache synced", H::NAME))?;
        }
        () = wait_for_shutdown(&mut shutdown) => {
            info!(controller = H::NAME, "Shutdown requested before caches synced");
            handler.queue().shut_down();
            return Ok(());
        }
    }

    let workers = workers.max(1);
    info!(controller = H::NAME, workers, "Caches synced, starting workers");

    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            while process_next_item(handler.as_ref()).await {}
            debug!(controller = H::NAME, worker, "Worker stopped");
        });
    }

    let mut resync =
        resync_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    let outcome = loop {
        tokio::select! {
            () = wait_for_shutdown(&mut shutdown) => break Ok(()),
            () = next_resync(resync.as_mut()) => {
                let keys = handler.resync();
                debug!(controller = H::NAME, keys, "Periodic resync");
                metrics::record_resync(H::NAME, keys);
                metrics::set_workqueue_depth(H::NAME, handler.queue().len());
            }
            Some(joined) = tasks.join_next() => {
                let reason = match joined {
                    Ok(()) => "exited".to_string(),
                    Err(e) => e.to_string(),
                };
                error!(controller = H::NAME, reason = %reason, "CRITICAL: worker stopped unexpectedly");
                break Err(anyhow::anyhow!("{} worker stopped unexpectedly: {reason}", H::NAME));
            }
        }
    };

    info!(controller = H::NAME, "Shutting down, waiting for in-flight syncs");
    handler.queue().shut_down();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(controller = H::NAME, error = %e, "Worker task failed during shutdown");
        }
    }
    info!(controller = H::NAME, "Controller stopped");

    outcome
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
