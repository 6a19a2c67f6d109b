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

//! Host capability contracts consumed by the patcher
//!
//! The container provides these services; the patcher only calls them. Each is
//! published in the capability directory as an `Arc<dyn Trait>`.

use crate::capability::{CapabilityHandle, CapabilityId, LoadingContext};
use crate::error::HostError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Numeric identifier the host assigns to an installed module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

/// An installed module as enumerated by the module registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledModule {
    pub id: ModuleId,
    pub symbolic_name: String,
    /// Location the module was installed from
    pub location: String,
}

/// Identity of a module as seen by the update gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleIdentity {
    pub symbolic_name: String,
    pub current_location: String,
    /// Location the host considers authoritative for updates
    pub current_update_location: String,
}

impl ModuleIdentity {
    /// Whether `target` is already what this module runs
    pub fn is_current(&self, target: &str) -> bool {
        target == self.current_location || target == self.current_update_location
    }
}

/// Downloaded module content that declares where it was updated from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedArtifact {
    pub content: Vec<u8>,
    pub update_location: String,
}

/// Host configuration store
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Properties of the configuration `pid`, if it exists
    async fn properties(&self, pid: &str) -> Result<Option<BTreeMap<String, String>>, HostError>;
}

/// Host module registry
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// All currently installed modules, in installation order
    async fn installed_modules(&self) -> Result<Vec<InstalledModule>, HostError>;

    /// The update location the host records for `module`
    async fn update_location(&self, module: ModuleId) -> Result<String, HostError>;

    /// Replace the content of `module` in place
    async fn update(&self, module: ModuleId, artifact: NormalizedArtifact) -> Result<(), HostError>;

    /// Refresh the dependency graph so the given modules are fully rewired
    async fn refresh(&self, modules: &[ModuleId]) -> Result<(), HostError>;
}

/// Host feature registry
#[async_trait]
pub trait FeatureRegistry: Send + Sync {
    /// Whether a feature with this name is known to any repository
    async fn is_known(&self, feature: &str) -> Result<bool, HostError>;

    async fn is_installed(&self, feature: &str) -> Result<bool, HostError>;

    async fn add_repository(&self, uri: &str) -> Result<(), HostError>;

    async fn repositories(&self) -> Result<Vec<String>, HostError>;

    async fn refresh_repositories(&self, uris: &[String]) -> Result<(), HostError>;

    async fn install_feature(&self, feature: &str) -> Result<(), HostError>;
}

impl CapabilityHandle {
    pub fn configuration_store(context: LoadingContext, store: Arc<dyn ConfigurationStore>) -> Self {
        Self::new(CapabilityId::CONFIGURATION_STORE, context, store)
    }

    pub fn module_registry(context: LoadingContext, registry: Arc<dyn ModuleRegistry>) -> Self {
        Self::new(CapabilityId::MODULE_REGISTRY, context, registry)
    }

    pub fn feature_registry(context: LoadingContext, registry: Arc<dyn FeatureRegistry>) -> Self {
        Self::new(CapabilityId::FEATURE_REGISTRY, context, registry)
    }
}
