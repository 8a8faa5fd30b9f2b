// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch Services and EndpointSlices into reflector stores and dispatch change
//! notifications.
//!
//! Each informer feeds one `kube` watcher into a [`Writer`] and, for every
//! event, tells a [`ResourceEventHandler`] whether the object was added,
//! updated or deleted. The previous version of an object is read from the store
//! before the event is applied, so handlers can compare resource versions.
//!
//! A re-list (at startup or after a watch desync) is diffed against the store:
//! objects that disappeared meanwhile are reported as deletes when it completes.

use futures::TryStreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Receiver of object change notifications. Implementations must not block.
pub trait ResourceEventHandler<K> {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// Store and writer pair of one informer.
#[must_use]
pub fn store<K>() -> (Store<K>, Writer<K>)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    reflector::store()
}

/// Applies watcher events to a store and dispatches them to a handler.
pub struct EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    writer: Writer<K>,
    reader: Store<K>,
    /// Objects of the re-list in progress, with their cached version if any
    relisted: Vec<(Option<Arc<K>>, K)>,
}

impl<K> EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    #[must_use]
    pub fn new(writer: Writer<K>) -> Self {
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            relisted: Vec::new(),
        }
    }

    /// Apply one watcher event, then notify `handler`.
    ///
    /// Objects of a re-list are announced once the whole list is in the
    /// store, so handlers never read a half-swapped cache.
    pub fn dispatch<H: ResourceEventHandler<K> + ?Sized>(&mut self, event: Event<K>, handler: &H) {
        match &event {
            Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(&event);
                match old {
                    Some(old) => handler.on_update(&old, obj),
                    None => handler.on_add(obj),
                }
            }
            Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                handler.on_delete(obj);
            }
            Event::Init => {
                self.relisted.clear();
                self.writer.apply_watcher_event(&event);
            }
            Event::InitApply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.relisted.push((old, obj.clone()));
                self.writer.apply_watcher_event(&event);
            }
            Event::InitDone => {
                let listed: HashSet<ObjectRef<K>> = self
                    .relisted
                    .iter()
                    .map(|(_, obj)| ObjectRef::from_obj(obj))
                    .collect();
                let vanished: Vec<Arc<K>> = self
                    .reader
                    .state()
                    .into_iter()
                    .filter(|obj| !listed.contains(&ObjectRef::from_obj(obj.as_ref())))
                    .collect();
                self.writer.apply_watcher_event(&event);

                for (old, obj) in std::mem::take(&mut self.relisted) {
                    match old {
                        Some(old) => handler.on_update(&old, &obj),
                        None => handler.on_add(&obj),
                    }
                }
                for obj in vanished {
                    handler.on_delete(&obj);
                }
            }
        }
    }
}

/// Watch `api` until `shutdown` flips to true, keeping `writer`'s store current.
///
/// Watch errors are logged and retried with the watcher's default backoff.
pub async fn run_informer<K, H>(
    api: Api<K>,
    writer: Writer<K>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    H: ResourceEventHandler<K> + ?Sized,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    info!(kind = %kind, "Starting informer");

    let mut dispatcher = EventDispatcher::new(writer);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            next = stream.try_next() => match next {
                Ok(Some(event)) => dispatcher.dispatch(event, handler.as_ref()),
                Ok(None) => {
                    warn!(kind = %kind, "Watch stream ended");
                    return;
                }
                Err(e) => warn!(kind = %kind, error = %e, "Watch error, retrying"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(kind = %kind, "Stopping informer");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "informers_tests.rs"]
mod informers_tests;
