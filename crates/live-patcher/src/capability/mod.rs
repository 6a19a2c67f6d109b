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

//! Host capabilities: identifiers, handles and the directory that announces them
//!
//! A capability is a service provided by the host container (configuration store,
//! module registry, feature registry). The host announces capabilities through a
//! [`CapabilityDirectory`]; the [`ServiceLocator`] tracks the ones a patch session
//! needs and lets the session wait for them.

mod directory;
mod locator;

pub use directory::InMemoryDirectory;
pub use locator::{DEFAULT_RESOLVE_TIMEOUT, LocatorDiagnostic, ServiceLocator};

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Identifier of a host capability (e.g. "module-registry")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityId(Cow<'static, str>);

impl CapabilityId {
    pub const CONFIGURATION_STORE: Self = Self(Cow::Borrowed("configuration-store"));
    pub const MODULE_REGISTRY: Self = Self(Cow::Borrowed("module-registry"));
    pub const FEATURE_REGISTRY: Self = Self(Cow::Borrowed("feature-registry"));

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context a capability implementation was loaded from
///
/// A handle whose context differs from the one the locator expects is still
/// usable, but usually means two incompatible copies of the capability are
/// deployed side by side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadingContext(String);

impl LoadingContext {
    pub fn new(context: impl Into<String>) -> Self {
        Self(context.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a live host service
#[derive(Clone)]
pub struct CapabilityHandle {
    id: CapabilityId,
    context: LoadingContext,
    service: Arc<dyn Any + Send + Sync>,
}

impl CapabilityHandle {
    /// Wrap a service value. Trait-object services are stored as their `Arc`,
    /// e.g. `Arc<dyn ModuleRegistry>`, and recovered with [`Self::downcast`].
    pub fn new<T>(id: CapabilityId, context: LoadingContext, service: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            id,
            context,
            service: Arc::new(service),
        }
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    pub fn context(&self) -> &LoadingContext {
        &self.context
    }

    /// Clone the wrapped service out if it has type `T`
    pub fn downcast<T>(&self) -> Option<T>
    where
        T: Any + Clone,
    {
        self.service.downcast_ref::<T>().cloned()
    }

    /// Whether both handles refer to the same published service instance
    pub fn same_service(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.service, &other.service)
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("id", &self.id)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Receives add/modify/remove notifications for one capability identifier.
///
/// Notifications may arrive on any thread, at any time.
pub trait CapabilityListener: Send + Sync {
    fn added(&self, handle: CapabilityHandle);
    fn modified(&self, handle: CapabilityHandle);
    fn removed(&self, handle: CapabilityHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Host-side lookup of capabilities by identifier
///
/// At most one live handle exists per identifier. Subscribing delivers an
/// `added` notification for the current handle, if any, before returning.
pub trait CapabilityDirectory: Send + Sync {
    fn subscribe(&self, id: &CapabilityId, listener: Arc<dyn CapabilityListener>) -> SubscriptionId;

    fn unsubscribe(&self, subscription: SubscriptionId);
}
