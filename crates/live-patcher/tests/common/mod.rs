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

//! In-memory host used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use live_patcher::fetcher::LocationFetcher;
use live_patcher::host::{
    ConfigurationStore, FeatureRegistry, InstalledModule, ModuleId, ModuleRegistry,
    NormalizedArtifact,
};
use live_patcher::payload::EmbeddedPayloads;
use live_patcher::repository::RepositoryRoot;
use live_patcher::{
    ArtifactInstaller, CapabilityHandle, CapabilityId, HostError, InMemoryDirectory,
    LoadingContext, Patcher, PatchPlan,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;

pub const CORE_REGISTRY: &str = "core-registry";
pub const CORE_A: &str = "mvn:org.example/core-registry/1.0.0";
pub const CORE_B: &str = "mvn:org.example/core-registry/1.1.0";
pub const CORE_B_DIR: &str = "org/example/core-registry/1.1.0";
pub const CORE_B_JAR: &str = "core-registry-1.1.0.jar";
pub const STANDARD_DIR: &str = "org/apache/karaf/features/standard/4.2.7";
pub const STANDARD_REPO: &str = "mvn:org.apache.karaf.features/standard/4.2.7/xml/features";
pub const CAMEL_REPO: &str = "mvn:org.apache.camel.karaf/apache-camel/2.23.1/xml/features";

pub fn host_context() -> LoadingContext {
    LoadingContext::new("host-framework")
}

#[derive(Debug, Clone)]
pub struct FakeModule {
    pub id: ModuleId,
    pub symbolic_name: String,
    pub location: String,
    pub update_location: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct FakeModuleRegistry {
    pub modules: Mutex<Vec<FakeModule>>,
    pub updates: Mutex<Vec<(ModuleId, String)>>,
    pub refreshes: Mutex<Vec<Vec<ModuleId>>>,
}

impl FakeModuleRegistry {
    pub fn with_module(self, id: u64, symbolic_name: &str, location: &str) -> Self {
        self.modules.lock().push(FakeModule {
            id: ModuleId(id),
            symbolic_name: symbolic_name.to_owned(),
            location: location.to_owned(),
            update_location: Some(location.to_owned()),
            content: Vec::new(),
        });
        self
    }

    pub fn module(&self, symbolic_name: &str) -> Option<FakeModule> {
        self.modules
            .lock()
            .iter()
            .find(|m| m.symbolic_name == symbolic_name)
            .cloned()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

#[async_trait]
impl ModuleRegistry for FakeModuleRegistry {
    async fn installed_modules(&self) -> Result<Vec<InstalledModule>, HostError> {
        Ok(self
            .modules
            .lock()
            .iter()
            .map(|m| InstalledModule {
                id: m.id,
                symbolic_name: m.symbolic_name.clone(),
                location: m.location.clone(),
            })
            .collect())
    }

    async fn update_location(&self, module: ModuleId) -> Result<String, HostError> {
        self.modules
            .lock()
            .iter()
            .find(|m| m.id == module)
            .and_then(|m| m.update_location.clone())
            .ok_or_else(|| HostError::Unavailable(format!("no info for module {}", module.0)))
    }

    async fn update(&self, module: ModuleId, artifact: NormalizedArtifact) -> Result<(), HostError> {
        let mut modules = self.modules.lock();
        let target = modules
            .iter_mut()
            .find(|m| m.id == module)
            .ok_or_else(|| HostError::Rejected(format!("module {} uninstalled", module.0)))?;
        target.update_location = Some(artifact.update_location.clone());
        target.content = artifact.content;
        self.updates.lock().push((module, artifact.update_location));
        Ok(())
    }

    async fn refresh(&self, modules: &[ModuleId]) -> Result<(), HostError> {
        self.refreshes.lock().push(modules.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFeatureRegistry {
    /// Features each repository URI declares
    pub catalog: HashMap<String, Vec<String>>,
    pub repositories: Mutex<Vec<String>>,
    pub installed: Mutex<Vec<String>>,
    pub refreshed: Mutex<Vec<Vec<String>>>,
    pub refresh_fails: AtomicBool,
    pub rejected: HashSet<String>,
}

impl FakeFeatureRegistry {
    pub fn with_repository(mut self, uri: &str, features: &[&str], added: bool) -> Self {
        self.catalog.insert(
            uri.to_owned(),
            features.iter().map(|f| (*f).to_owned()).collect(),
        );
        if added {
            self.repositories.lock().push(uri.to_owned());
        }
        self
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().clone()
    }

    fn known(&self, feature: &str) -> bool {
        self.repositories.lock().iter().any(|uri| {
            self.catalog
                .get(uri)
                .is_some_and(|features| features.iter().any(|f| f == feature))
        })
    }
}

#[async_trait]
impl FeatureRegistry for FakeFeatureRegistry {
    async fn is_known(&self, feature: &str) -> Result<bool, HostError> {
        Ok(self.known(feature))
    }

    async fn is_installed(&self, feature: &str) -> Result<bool, HostError> {
        Ok(self.installed.lock().iter().any(|f| f == feature))
    }

    async fn add_repository(&self, uri: &str) -> Result<(), HostError> {
        if !self.catalog.contains_key(uri) {
            return Err(HostError::Rejected(format!("cannot read repository {uri}")));
        }
        let mut repositories = self.repositories.lock();
        if !repositories.iter().any(|r| r == uri) {
            repositories.push(uri.to_owned());
        }
        Ok(())
    }

    async fn repositories(&self) -> Result<Vec<String>, HostError> {
        Ok(self.repositories.lock().clone())
    }

    async fn refresh_repositories(&self, uris: &[String]) -> Result<(), HostError> {
        self.refreshed.lock().push(uris.to_vec());
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("repository host unreachable".to_owned()));
        }
        Ok(())
    }

    async fn install_feature(&self, feature: &str) -> Result<(), HostError> {
        if self.rejected.contains(feature) || !self.known(feature) {
            return Err(HostError::Rejected(format!("no feature named {feature}")));
        }
        let mut installed = self.installed.lock();
        if installed.iter().any(|f| f == feature) {
            return Err(HostError::Rejected(format!("{feature} already installed")));
        }
        installed.push(feature.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConfigurationStore {
    pub configurations: HashMap<String, BTreeMap<String, String>>,
}

#[async_trait]
impl ConfigurationStore for FakeConfigurationStore {
    async fn properties(&self, pid: &str) -> Result<Option<BTreeMap<String, String>>, HostError> {
        Ok(self.configurations.get(pid).cloned())
    }
}

/// A running container: repository on disk, registries, capability directory
pub struct TestHost {
    pub base: TempDir,
    pub directory: Arc<InMemoryDirectory>,
    pub modules: Arc<FakeModuleRegistry>,
    pub features: Arc<FakeFeatureRegistry>,
    pub configuration: Arc<FakeConfigurationStore>,
}

impl TestHost {
    pub fn new(modules: FakeModuleRegistry, features: FakeFeatureRegistry) -> Self {
        Self {
            base: TempDir::new().expect("temp dir"),
            directory: Arc::new(InMemoryDirectory::new()),
            modules: Arc::new(modules),
            features: Arc::new(features),
            configuration: Arc::new(FakeConfigurationStore::default()),
        }
    }

    pub fn repository(&self) -> RepositoryRoot {
        RepositoryRoot::under_host_base(self.base.path())
    }

    pub fn publish_all(&self) {
        self.publish_configuration();
        self.publish_modules();
        self.publish_features();
    }

    pub fn publish_configuration(&self) {
        let store: Arc<dyn ConfigurationStore> = self.configuration.clone();
        self.directory
            .publish(CapabilityHandle::configuration_store(host_context(), store));
    }

    pub fn publish_modules(&self) {
        let registry: Arc<dyn ModuleRegistry> = self.modules.clone();
        self.directory
            .publish(CapabilityHandle::module_registry(host_context(), registry));
    }

    pub fn publish_features(&self) {
        let registry: Arc<dyn FeatureRegistry> = self.features.clone();
        self.directory
            .publish(CapabilityHandle::feature_registry(host_context(), registry));
    }

    /// Simulate the module registry being torn down and brought back
    pub fn restart_module_registry(&self) {
        self.directory.withdraw(&CapabilityId::MODULE_REGISTRY);
        self.publish_modules();
    }

    pub fn installer(&self, payloads: EmbeddedPayloads) -> ArtifactInstaller {
        let repository = self.repository();
        let fetcher = LocationFetcher::new(repository.clone(), Vec::new()).expect("fetcher");
        ArtifactInstaller::new(repository, Arc::new(payloads), Arc::new(fetcher))
    }

    pub fn patcher(&self, plan: PatchPlan, payloads: EmbeddedPayloads) -> Patcher {
        Patcher::new(
            plan,
            self.installer(payloads),
            self.directory.clone(),
            host_context(),
        )
        .expect("valid plan")
    }
}

/// Collects formatted log output of the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events here until the guard is dropped
    pub fn install(&self) -> DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
