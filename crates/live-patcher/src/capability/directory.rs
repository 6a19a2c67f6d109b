// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of live-patcher.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! In-memory capability directory for embedding hosts and tests

use super::{CapabilityDirectory, CapabilityHandle, CapabilityId, CapabilityListener, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Listeners = Vec<(SubscriptionId, Arc<dyn CapabilityListener>)>;

#[derive(Default)]
struct DirectoryState {
    handles: HashMap<CapabilityId, CapabilityHandle>,
    listeners: HashMap<CapabilityId, Listeners>,
    next_subscription: u64,
}

/// Capability directory that delivers notifications on the publishing thread
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    // Serializes notification delivery so listeners observe changes in order.
    dispatch: Mutex<()>,
}

enum Change {
    Added,
    Modified,
    Removed,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle, replacing any existing one for the same identifier
    pub fn publish(&self, handle: CapabilityHandle) {
        let _dispatch = self.dispatch.lock();
        let (change, listeners) = {
            let mut state = self.state.lock();
            let change = if state.handles.contains_key(handle.id()) {
                Change::Modified
            } else {
                Change::Added
            };
            state.handles.insert(handle.id().clone(), handle.clone());
            (change, Self::listeners_of(&state, handle.id()))
        };
        Self::notify(&listeners, &change, &handle);
    }

    /// Withdraw the handle for `id`, returning it if one was published
    pub fn withdraw(&self, id: &CapabilityId) -> Option<CapabilityHandle> {
        let _dispatch = self.dispatch.lock();
        let (removed, listeners) = {
            let mut state = self.state.lock();
            let removed = state.handles.remove(id)?;
            (removed, Self::listeners_of(&state, id))
        };
        Self::notify(&listeners, &Change::Removed, &removed);
        Some(removed)
    }

    pub fn current(&self, id: &CapabilityId) -> Option<CapabilityHandle> {
        self.state.lock().handles.get(id).cloned()
    }

    pub fn listener_count(&self, id: &CapabilityId) -> usize {
        self.state.lock().listeners.get(id).map_or(0, Vec::len)
    }

    fn listeners_of(state: &DirectoryState, id: &CapabilityId) -> Vec<Arc<dyn CapabilityListener>> {
        state
            .listeners
            .get(id)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    fn notify(listeners: &[Arc<dyn CapabilityListener>], change: &Change, handle: &CapabilityHandle) {
        for listener in listeners {
            match change {
                Change::Added => listener.added(handle.clone()),
                Change::Modified => listener.modified(handle.clone()),
                Change::Removed => listener.removed(handle.clone()),
            }
        }
    }
}

impl CapabilityDirectory for InMemoryDirectory {
    fn subscribe(&self, id: &CapabilityId, listener: Arc<dyn CapabilityListener>) -> SubscriptionId {
        let _dispatch = self.dispatch.lock();
        let (subscription, current) = {
            let mut state = self.state.lock();
            state.next_subscription += 1;
            let subscription = SubscriptionId(state.next_subscription);
            state
                .listeners
                .entry(id.clone())
                .or_default()
                .push((subscription, listener.clone()));
            (subscription, state.handles.get(id).cloned())
        };
        if let Some(handle) = current {
            listener.added(handle);
        }
        subscription
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut state = self.state.lock();
        for listeners in state.listeners.values_mut() {
            listeners.retain(|(id, _)| *id != subscription);
        }
        state.listeners.retain(|_, listeners| !listeners.is_empty());
    }
}

impl fmt::Debug for InMemoryDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryDirectory")
            .field("handles", &state.handles.keys().collect::<Vec<_>>())
            .field("subscriptions", &state.listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
