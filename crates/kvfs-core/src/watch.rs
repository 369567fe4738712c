// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Watch bus: per-path change notification registries
//!
//! Two independent registries, both keyed by exact normalized path:
//! event listeners receive `(WatchEvent, base_name)` on every create, delete
//! and content-changing write; paired-snapshot listeners receive before/after
//! stat snapshots and fire only on in-place modification.
//!
//! Delivery is best-effort: the listener set is snapshotted before
//! iteration, so listeners may unregister themselves (or others) during
//! dispatch, and a panicking listener is swallowed without affecting the
//! remaining listeners or the triggering operation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::paths;
use crate::types::Stats;

/// Event kinds delivered to path listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// The entry was created, deleted, or moved.
    Rename,
    /// The entry's content changed in place.
    Change,
}

/// Listener for path events; receives the event kind and the base name of
/// the affected path.
pub type EventListener = dyn Fn(WatchEvent, &str) + Send + Sync;

/// Listener for paired stat snapshots; receives `(current, previous)`.
pub type SnapshotListener = dyn Fn(&Stats, &Stats) + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegistryKind {
    Event,
    Snapshot,
}

struct BusInner {
    event_listeners: Mutex<HashMap<String, Vec<(u64, Arc<EventListener>)>>>,
    snapshot_listeners: Mutex<HashMap<String, Vec<(u64, Arc<SnapshotListener>)>>>,
    next_id: Mutex<u64>,
}

impl BusInner {
    fn allocate_id(&self) -> u64 {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        id
    }

    fn remove(&self, kind: RegistryKind, path: &str, id: u64) {
        match kind {
            RegistryKind::Event => {
                let mut listeners = self.event_listeners.lock().unwrap();
                if let Some(set) = listeners.get_mut(path) {
                    set.retain(|(listener_id, _)| *listener_id != id);
                    if set.is_empty() {
                        listeners.remove(path);
                    }
                }
            }
            RegistryKind::Snapshot => {
                let mut listeners = self.snapshot_listeners.lock().unwrap();
                if let Some(set) = listeners.get_mut(path) {
                    set.retain(|(listener_id, _)| *listener_id != id);
                    if set.is_empty() {
                        listeners.remove(path);
                    }
                }
            }
        }
    }
}

/// Registration handle returned by `watch`/`watch_file`; closing it removes
/// the listener. Dropping the handle without closing leaves the listener
/// registered, matching the explicit-close lifecycle of the watch surface.
pub struct WatchHandle {
    id: u64,
    path: String,
    kind: RegistryKind,
    bus: Arc<BusInner>,
}

impl WatchHandle {
    /// Path this handle is registered for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Unregister the listener. Safe to call during a dispatch that is
    /// currently delivering to it.
    pub fn close(&self) {
        self.bus.remove(self.kind, &self.path, self.id);
    }
}

/// The pair of listener registries delivering path-level and
/// paired-snapshot change notifications.
pub struct WatchBus {
    inner: Arc<BusInner>,
}

impl WatchBus {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                event_listeners: Mutex::new(HashMap::new()),
                snapshot_listeners: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1),
            }),
        }
    }

    /// Register an event listener for an exact normalized path.
    pub fn watch(
        &self,
        path: &str,
        listener: impl Fn(WatchEvent, &str) + Send + Sync + 'static,
    ) -> WatchHandle {
        let path = paths::normalize(path);
        let id = self.inner.allocate_id();
        self.inner
            .event_listeners
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        WatchHandle {
            id,
            path,
            kind: RegistryKind::Event,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Register a paired-snapshot listener for an exact normalized path.
    pub fn watch_file(
        &self,
        path: &str,
        listener: impl Fn(&Stats, &Stats) + Send + Sync + 'static,
    ) -> WatchHandle {
        let path = paths::normalize(path);
        let id = self.inner.allocate_id();
        self.inner
            .snapshot_listeners
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        WatchHandle {
            id,
            path,
            kind: RegistryKind::Snapshot,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Remove every paired-snapshot listener registered for a path.
    pub fn unwatch_file(&self, path: &str) {
        let path = paths::normalize(path);
        self.inner.snapshot_listeners.lock().unwrap().remove(&path);
    }

    /// Deliver an event to the listeners registered for `path`.
    pub(crate) fn emit(&self, path: &str, event: WatchEvent) {
        let listeners: Vec<Arc<EventListener>> = {
            let registry = self.inner.event_listeners.lock().unwrap();
            match registry.get(path) {
                Some(set) => set.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        let base = paths::base_name(path);
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event, base))).is_err() {
                warn!(path, ?event, "watch listener panicked; continuing delivery");
            }
        }
    }

    /// Deliver a before/after snapshot pair to the paired-snapshot listeners
    /// registered for `path`. Only called for in-place modifications, where
    /// both snapshots exist.
    pub(crate) fn emit_snapshot_pair(&self, path: &str, previous: &Stats, current: &Stats) {
        let listeners: Vec<Arc<SnapshotListener>> = {
            let registry = self.inner.snapshot_listeners.lock().unwrap();
            match registry.get(path) {
                Some(set) => set.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(current, previous))).is_err() {
                warn!(path, "watch-file listener panicked; continuing delivery");
            }
        }
    }
}
