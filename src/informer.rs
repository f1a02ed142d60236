// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch-driven cache population and event dispatch.
//!
//! [`run_informer`] runs a `kube` watcher through a reflector, so the shared [`Store`] is
//! updated before any callback sees an event, then hands each change to a dispatch closure
//! as a typed [`ResourceEvent`].
//!
//! A watcher relist (initial list or re-list after a lost watch) only reports the objects
//! that currently exist. [`EventDispatcher`] compares the relisted objects with the store
//! contents from before the relist and reports every object that vanished as
//! [`ResourceEvent::Deleted`], so deletions missed while disconnected are not lost.

use crate::controller::ResourceEvent;
use futures::StreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{Config, Event};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Translates watcher events into [`ResourceEvent`]s for one resource kind.
pub struct EventDispatcher<K, F>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    dispatch: F,
    relist: Option<Relist<K>>,
}

struct Relist<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash,
{
    previous: Vec<Arc<K>>,
    seen: HashSet<ObjectRef<K>>,
}

impl<K, F> EventDispatcher<K, F>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    F: FnMut(ResourceEvent<'_, K>),
{
    /// `store` must be the reader of the writer the reflector feeds.
    pub fn new(store: Store<K>, dispatch: F) -> Self {
        Self {
            store,
            dispatch,
            relist: None,
        }
    }

    /// Handle one event after the reflector applied it to the store.
    pub fn handle(&mut self, event: &Event<K>) {
        match event {
            Event::Apply(obj) => (self.dispatch)(ResourceEvent::Applied(obj)),
            Event::Delete(obj) => (self.dispatch)(ResourceEvent::Deleted(obj)),
            Event::Init => {
                // The store still holds the pre-relist state until InitDone
                self.relist = Some(Relist {
                    previous: self.store.state(),
                    seen: HashSet::new(),
                });
            }
            Event::InitApply(obj) => {
                if let Some(relist) = self.relist.as_mut() {
                    relist.seen.insert(ObjectRef::from_obj(obj));
                }
                (self.dispatch)(ResourceEvent::Applied(obj));
            }
            Event::InitDone => {
                let Some(relist) = self.relist.take() else {
                    return;
                };
                for obj in relist.previous {
                    if !relist.seen.contains(&ObjectRef::from_obj(obj.as_ref())) {
                        (self.dispatch)(ResourceEvent::Deleted(obj.as_ref()));
                    }
                }
            }
        }
    }
}

/// Watch `api`, keep `writer`'s store current and dispatch every change.
///
/// Watch errors are logged and retried with the default backoff; this only returns if the
/// watch stream ends.
///
/// # Errors
///
/// Returns an error when the watch stream terminates.
pub async fn run_informer<K, F>(api: Api<K>, writer: Writer<K>, dispatch: F) -> anyhow::Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    F: FnMut(ResourceEvent<'_, K>) + Send,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    info!(kind = %kind, "Starting informer");

    let mut dispatcher = EventDispatcher::new(writer.as_reader(), dispatch);
    let stream = reflector(writer, watcher(api, Config::default())).default_backoff();
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if matches!(event, Event::InitDone) {
                    debug!(kind = %kind, "Informer list complete");
                }
                dispatcher.handle(&event);
            }
            Err(e) => warn!(kind = %kind, error = %e, "Watch failed, retrying with backoff"),
        }
    }

    anyhow::bail!("{kind} informer stream ended")
}

#[cfg(test)]
#[path = "informer_tests.rs"]
mod informer_tests;
