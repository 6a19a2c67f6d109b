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

//! Service locator: waits for host capabilities to become available
//!
//! Each registered identifier owns one slot holding the current handle and an
//! availability gate. Both live in a single `watch` value so a notification
//! updates them atomically with respect to `resolve`.

use super::{
    CapabilityDirectory, CapabilityHandle, CapabilityId, CapabilityListener, LoadingContext,
    SubscriptionId,
};
use crate::error::{PatchError, Result};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Non-fatal findings recorded while tracking capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorDiagnostic {
    /// A handle was loaded from a different context than the locator expects
    ContextMismatch {
        id: CapabilityId,
        expected: LoadingContext,
        actual: LoadingContext,
    },
}

#[derive(Debug, Clone, Default)]
struct Slot {
    handle: Option<CapabilityHandle>,
    available: bool,
}

struct Tracker {
    defining_context: LoadingContext,
    slots: RwLock<HashMap<CapabilityId, watch::Sender<Slot>>>,
    diagnostics: Mutex<Vec<LocatorDiagnostic>>,
}

impl Tracker {
    fn with_slot(&self, id: &CapabilityId, update: impl FnOnce(&mut Slot)) -> bool {
        let slots = self.slots.read();
        match slots.get(id) {
            Some(sender) => {
                sender.send_modify(update);
                true
            }
            None => false,
        }
    }

    fn check_context(&self, handle: &CapabilityHandle) {
        if handle.context() == &self.defining_context {
            return;
        }
        error!(
            "Loading context issue for {}\n\t- expected : {}\n\t- retrieved: {}",
            handle.id(),
            self.defining_context,
            handle.context()
        );
        self.diagnostics.lock().push(LocatorDiagnostic::ContextMismatch {
            id: handle.id().clone(),
            expected: self.defining_context.clone(),
            actual: handle.context().clone(),
        });
    }
}

impl CapabilityListener for Tracker {
    fn added(&self, handle: CapabilityHandle) {
        let id = handle.id().clone();
        info!("Capability {id} added");
        self.check_context(&handle);
        let tracked = self.with_slot(&id, |slot| {
            slot.handle = Some(handle);
            slot.available = true;
        });
        if !tracked {
            debug!("Ignoring untracked capability {id}");
        }
    }

    fn modified(&self, handle: CapabilityHandle) {
        let id = handle.id().clone();
        info!("Capability {id} modified");
        self.with_slot(&id, |slot| {
            slot.handle = Some(handle);
            slot.available = true;
        });
    }

    fn removed(&self, handle: CapabilityHandle) {
        let id = handle.id().clone();
        info!("Capability {id} removed");
        self.with_slot(&id, |slot| {
            let current = slot
                .handle
                .as_ref()
                .is_some_and(|recorded| recorded.same_service(&handle));
            if current {
                // The stale handle stays recorded for callers that already hold it.
                slot.available = false;
            } else {
                debug!("Removed handle for {id} is not the current one");
            }
        });
    }
}

/// Tracks named host capabilities and hands them out once available
pub struct ServiceLocator {
    directory: Arc<dyn CapabilityDirectory>,
    tracker: Arc<Tracker>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    default_timeout: Duration,
}

impl ServiceLocator {
    /// `defining_context` is the context the patcher itself expects capability
    /// implementations to be loaded from.
    pub fn new(directory: Arc<dyn CapabilityDirectory>, defining_context: LoadingContext) -> Self {
        Self {
            directory,
            tracker: Arc::new(Tracker {
                defining_context,
                slots: RwLock::new(HashMap::new()),
                diagnostics: Mutex::new(Vec::new()),
            }),
            subscriptions: Mutex::new(Vec::new()),
            default_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Start tracking a capability. Returns immediately; registering the same
    /// identifier twice is a no-op.
    pub fn register(&self, id: &CapabilityId) {
        {
            let mut slots = self.tracker.slots.write();
            if slots.contains_key(id) {
                return;
            }
            let (sender, _) = watch::channel(Slot::default());
            slots.insert(id.clone(), sender);
        }

        info!("Tracking capability {id}");
        let listener: Arc<dyn CapabilityListener> = self.tracker.clone();
        let subscription = self.directory.subscribe(id, listener);
        self.subscriptions.lock().push(subscription);
    }

    /// Wait until a handle for `id` is available, up to `timeout`
    pub async fn resolve(&self, id: &CapabilityId, timeout: Duration) -> Result<CapabilityHandle> {
        let mut receiver = {
            let slots = self.tracker.slots.read();
            slots.get(id).map(watch::Sender::subscribe)
        }
        .ok_or_else(|| PatchError::CapabilityUnavailable {
            id: id.clone(),
            reason: "capability is not registered".to_owned(),
        })?;

        let waited = tokio::time::timeout(timeout, receiver.wait_for(|slot| slot.available)).await;
        match waited {
            Err(_) => {
                warn!("Capability {id} timed out after {}s", timeout.as_secs());
                Err(PatchError::CapabilityTimeout {
                    id: id.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
            Ok(Err(_)) => Err(PatchError::CapabilityUnavailable {
                id: id.clone(),
                reason: "capability tracking stopped".to_owned(),
            }),
            Ok(Ok(slot)) => slot.handle.clone().ok_or_else(|| PatchError::CapabilityUnavailable {
                id: id.clone(),
                reason: "gate open without a recorded handle".to_owned(),
            }),
        }
    }

    /// Resolve and downcast to the service type the caller expects
    pub async fn resolve_as<T>(&self, id: &CapabilityId, timeout: Duration) -> Result<T>
    where
        T: Any + Clone,
    {
        let handle = self.resolve(id, timeout).await?;
        handle
            .downcast::<T>()
            .ok_or_else(|| PatchError::CapabilityUnavailable {
                id: id.clone(),
                reason: format!(
                    "handle does not expose {}",
                    std::any::type_name::<T>()
                ),
            })
    }

    /// [`Self::resolve`] bounded by the locator's default timeout
    pub async fn resolve_default(&self, id: &CapabilityId) -> Result<CapabilityHandle> {
        self.resolve(id, self.default_timeout).await
    }

    pub async fn resolve_as_default<T>(&self, id: &CapabilityId) -> Result<T>
    where
        T: Any + Clone,
    {
        self.resolve_as(id, self.default_timeout).await
    }

    /// Whether a resolve for `id` would currently succeed without waiting
    pub fn is_available(&self, id: &CapabilityId) -> bool {
        let slots = self.tracker.slots.read();
        slots.get(id).is_some_and(|sender| {
            let slot = sender.borrow();
            slot.available && slot.handle.is_some()
        })
    }

    pub fn diagnostics(&self) -> Vec<LocatorDiagnostic> {
        self.tracker.diagnostics.lock().clone()
    }

    /// Stop tracking every capability. Pending resolves fail as unavailable.
    pub fn stop(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            self.directory.unsubscribe(subscription);
        }
        self.tracker.slots.write().clear();
    }
}

impl fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked: Vec<CapabilityId> = self.tracker.slots.read().keys().cloned().collect();
        f.debug_struct("ServiceLocator")
            .field("tracked", &tracked)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for ServiceLocator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::InMemoryDirectory;

    fn host() -> LoadingContext {
        LoadingContext::new("host")
    }

    fn handle(id: &CapabilityId, value: &'static str) -> CapabilityHandle {
        CapabilityHandle::new(id.clone(), host(), value)
    }

    fn locator(directory: &Arc<InMemoryDirectory>) -> ServiceLocator {
        let directory: Arc<dyn CapabilityDirectory> = directory.clone();
        ServiceLocator::new(directory, host())
    }

    #[tokio::test]
    async fn test_resolve_already_published() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        directory.publish(handle(&id, "registry"));

        let locator = locator(&directory);
        locator.register(&id);

        assert!(locator.is_available(&id));
        let resolved = locator.resolve_as::<&str>(&id, Duration::from_secs(1)).await;
        assert_eq!(resolved.unwrap(), "registry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_waits_for_added() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::FEATURE_REGISTRY;
        let locator = locator(&directory);
        locator.register(&id);
        assert!(!locator.is_available(&id));

        let publisher = directory.clone();
        let published = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            publisher.publish(handle(&published, "features"));
        });

        let resolved = locator.resolve(&id, DEFAULT_RESOLVE_TIMEOUT).await.unwrap();
        assert_eq!(resolved.downcast::<&str>(), Some("features"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_times_out() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::CONFIGURATION_STORE;
        let locator = locator(&directory);
        locator.register(&id);

        let result = locator.resolve(&id, DEFAULT_RESOLVE_TIMEOUT).await;
        assert!(matches!(
            result,
            Err(PatchError::CapabilityTimeout { timeout_secs: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_unregistered_is_unavailable() {
        let directory = Arc::new(InMemoryDirectory::new());
        let locator = locator(&directory);

        let result = locator
            .resolve(&CapabilityId::MODULE_REGISTRY, Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(PatchError::CapabilityUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_closes_gate_keeps_held_handle() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        directory.publish(handle(&id, "registry"));
        let locator = locator(&directory);
        locator.register(&id);

        let held = locator.resolve(&id, Duration::from_secs(1)).await.unwrap();
        directory.withdraw(&id);

        assert!(!locator.is_available(&id));
        assert_eq!(held.downcast::<&str>(), Some("registry"));
        let result = locator.resolve(&id, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(PatchError::CapabilityTimeout { .. })));

        directory.publish(handle(&id, "registry-restarted"));
        let resolved = locator.resolve(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved.downcast::<&str>(), Some("registry-restarted"));
    }

    #[tokio::test]
    async fn test_modified_replaces_handle() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::FEATURE_REGISTRY;
        directory.publish(handle(&id, "v1"));
        let locator = locator(&directory);
        locator.register(&id);

        directory.publish(handle(&id, "v2"));

        let resolved = locator.resolve(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved.downcast::<&str>(), Some("v2"));
    }

    #[tokio::test]
    async fn test_context_mismatch_is_recorded_but_usable() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        directory.publish(CapabilityHandle::new(
            id.clone(),
            LoadingContext::new("other-copy"),
            "registry",
        ));
        let locator = locator(&directory);
        locator.register(&id);

        let resolved = locator.resolve(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved.downcast::<&str>(), Some("registry"));
        assert_eq!(
            locator.diagnostics(),
            vec![LocatorDiagnostic::ContextMismatch {
                id,
                expected: host(),
                actual: LoadingContext::new("other-copy"),
            }]
        );
    }

    #[tokio::test]
    async fn test_resolve_as_wrong_type() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        directory.publish(handle(&id, "registry"));
        let locator = locator(&directory);
        locator.register(&id);

        let result = locator.resolve_as::<u64>(&id, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(PatchError::CapabilityUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fails_pending_resolve() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        let locator = Arc::new(locator(&directory));
        locator.register(&id);

        let waiting = {
            let locator = locator.clone();
            let id = id.clone();
            tokio::spawn(async move { locator.resolve(&id, DEFAULT_RESOLVE_TIMEOUT).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        locator.stop();

        let result = waiting.await.unwrap();
        assert!(matches!(
            result,
            Err(PatchError::CapabilityUnavailable { .. })
        ));
        assert_eq!(directory.listener_count(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_default_uses_configured_timeout() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::FEATURE_REGISTRY;
        assert_eq!(locator(&directory).default_timeout(), DEFAULT_RESOLVE_TIMEOUT);

        let locator = locator(&directory).with_default_timeout(Duration::from_secs(2));
        locator.register(&id);
        let started = tokio::time::Instant::now();

        let result = locator.resolve_as_default::<&str>(&id).await;

        assert!(matches!(
            result,
            Err(PatchError::CapabilityTimeout { timeout_secs: 2, .. })
        ));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < DEFAULT_RESOLVE_TIMEOUT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resolve_during_concurrent_notifications() {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = CapabilityId::MODULE_REGISTRY;
        let locator = locator(&directory);
        locator.register(&id);
        directory.publish(CapabilityHandle::new(id.clone(), host(), 0_u64));

        let churn = {
            let directory = directory.clone();
            let id = id.clone();
            std::thread::spawn(move || {
                for n in 1..=20_000_u64 {
                    directory.publish(CapabilityHandle::new(id.clone(), host(), n));
                    directory.withdraw(&id);
                }
                directory.publish(CapabilityHandle::new(id, host(), u64::MAX));
            })
        };

        // An open gate always has a handle behind it, whatever the interleaving.
        for _ in 0..2_000 {
            let resolved = locator
                .resolve(&id, Duration::from_secs(5))
                .await
                .unwrap_or_else(|e| panic!("resolve failed during churn: {e}"));
            assert!(resolved.downcast::<u64>().is_some());
        }

        churn.join().unwrap();
        let last = locator.resolve_as::<u64>(&id, Duration::from_secs(1)).await;
        assert_eq!(last.unwrap(), u64::MAX);
    }
}
