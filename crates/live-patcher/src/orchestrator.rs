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

//! Update orchestrator: drives one patch session through its stages
//!
//! Stages run strictly in order:
//!
//! ```text
//! Start -> SystemUpdated -> BundlesUpdated -> RepositoriesRefreshed -> FeaturesUpdated -> Done
//!               \
//!                `-> RestartPending (registry-hosting module updated)
//! ```
//!
//! Every stage checks whether its work is already applied before doing it, so
//! a session started again after `RestartPending` only performs what is left.

use crate::capability::{CapabilityDirectory, CapabilityId, LoadingContext, ServiceLocator};
use crate::error::{PatchError, Result};
use crate::features::{FeatureCoordinator, FeatureOutcome, RefreshReport};
use crate::host::{ConfigurationStore, FeatureRegistry, ModuleRegistry};
use crate::installer::{ArtifactInstaller, InstallOutcome, ModuleOutcome, UpdateOutcome};
use crate::plan::{ArtifactSpec, PatchPlan};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    SystemUpdated,
    BundlesUpdated,
    RepositoriesRefreshed,
    FeaturesUpdated,
    Done,
    /// The host will tear down and re-run the patcher
    RestartPending,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::RestartPending)
    }
}

/// Host capabilities resolved once at the start of a session
#[derive(Clone)]
pub struct SessionCapabilities {
    pub configuration: Arc<dyn ConfigurationStore>,
    pub modules: Arc<dyn ModuleRegistry>,
    pub features: Arc<dyn FeatureRegistry>,
}

impl SessionCapabilities {
    /// Register the three capabilities and wait for each of them, up to the
    /// locator's default timeout
    pub async fn resolve(locator: &ServiceLocator) -> Result<Self> {
        for id in [
            CapabilityId::CONFIGURATION_STORE,
            CapabilityId::FEATURE_REGISTRY,
            CapabilityId::MODULE_REGISTRY,
        ] {
            locator.register(&id);
        }

        Ok(Self {
            configuration: locator
                .resolve_as_default::<Arc<dyn ConfigurationStore>>(&CapabilityId::CONFIGURATION_STORE)
                .await?,
            modules: locator
                .resolve_as_default::<Arc<dyn ModuleRegistry>>(&CapabilityId::MODULE_REGISTRY)
                .await?,
            features: locator
                .resolve_as_default::<Arc<dyn FeatureRegistry>>(&CapabilityId::FEATURE_REGISTRY)
                .await?,
        })
    }
}

impl fmt::Debug for SessionCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCapabilities").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    NotNeeded,
    Performed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub file: String,
    pub outcome: InstallOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
    pub symbolic_name: String,
    pub target_location: String,
    pub outcome: ModuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureRecord {
    pub feature: String,
    pub outcome: FeatureOutcome,
}

/// What a session did, stage by stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub patch_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: Stage,
    pub bootstrap: Option<BootstrapOutcome>,
    pub artifacts: Vec<ArtifactRecord>,
    pub modules: Vec<ModuleRecord>,
    pub refresh: Option<RefreshReport>,
    pub features: Vec<FeatureRecord>,
}

impl SessionReport {
    fn new(patch_version: &str) -> Self {
        Self {
            patch_version: patch_version.to_owned(),
            started_at: Utc::now(),
            finished_at: None,
            stage: Stage::Start,
            bootstrap: None,
            artifacts: Vec::new(),
            modules: Vec::new(),
            refresh: None,
            features: Vec::new(),
        }
    }

    /// Number of files written into the repository
    pub fn files_written(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.outcome == InstallOutcome::Installed)
            .count()
    }

    pub fn modules_updated(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.outcome == ModuleOutcome::Updated)
            .count()
    }

    pub fn features_installed(&self) -> usize {
        self.features
            .iter()
            .filter(|f| f.outcome == FeatureOutcome::Installed)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed(SessionReport),
    /// A registry-hosting module was updated; the host re-runs the patcher
    RestartPending {
        module: String,
        report: SessionReport,
    },
}

impl SessionOutcome {
    pub fn report(&self) -> &SessionReport {
        match self {
            Self::Completed(report) | Self::RestartPending { report, .. } => report,
        }
    }

    pub fn is_restart_pending(&self) -> bool {
        matches!(self, Self::RestartPending { .. })
    }
}

/// Runs the ordered patch sequence described by a [`PatchPlan`]
pub struct UpdateOrchestrator {
    plan: PatchPlan,
    installer: ArtifactInstaller,
}

impl UpdateOrchestrator {
    pub fn new(plan: PatchPlan, installer: ArtifactInstaller) -> Self {
        Self { plan, installer }
    }

    pub fn plan(&self) -> &PatchPlan {
        &self.plan
    }

    /// Resolve the host capabilities through `locator`, then run a session.
    ///
    /// Each capability is awaited for the locator's default timeout.
    pub async fn run(&self, locator: &ServiceLocator) -> Result<SessionOutcome> {
        let capabilities = match SessionCapabilities::resolve(locator).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                error!("Patch failed waiting for host capabilities: {e}");
                return Err(e);
            }
        };
        self.run_with(capabilities).await
    }

    pub async fn run_with(&self, capabilities: SessionCapabilities) -> Result<SessionOutcome> {
        let mut session = PatchSession::new(self, capabilities);
        while !session.stage().is_terminal() {
            if let Err(e) = session.advance().await {
                error!("Patch failed after stage {:?}: {e}", session.stage());
                return Err(e);
            }
        }
        Ok(session.finish())
    }
}

impl fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("patch_version", &self.plan.patch_version)
            .field("installer", &self.installer)
            .finish()
    }
}

/// A single run of the orchestrator
pub struct PatchSession<'a> {
    orchestrator: &'a UpdateOrchestrator,
    capabilities: SessionCapabilities,
    features: FeatureCoordinator,
    stage: Stage,
    restart_module: Option<String>,
    report: SessionReport,
}

impl<'a> PatchSession<'a> {
    pub fn new(orchestrator: &'a UpdateOrchestrator, capabilities: SessionCapabilities) -> Self {
        let features = FeatureCoordinator::new(capabilities.features.clone());
        Self {
            report: SessionReport::new(&orchestrator.plan.patch_version),
            orchestrator,
            capabilities,
            features,
            stage: Stage::Start,
            restart_module: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn capabilities(&self) -> &SessionCapabilities {
        &self.capabilities
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Run the entry action of the next stage and move to it
    pub async fn advance(&mut self) -> Result<Stage> {
        let next = match self.stage {
            Stage::Start => {
                self.bootstrap().await?;
                self.update_system()?;
                Stage::SystemUpdated
            }
            Stage::SystemUpdated => self.update_modules().await?,
            Stage::BundlesUpdated => {
                self.refresh_repositories().await;
                Stage::RepositoriesRefreshed
            }
            Stage::RepositoriesRefreshed => {
                self.update_features().await?;
                Stage::FeaturesUpdated
            }
            Stage::FeaturesUpdated | Stage::Done => Stage::Done,
            Stage::RestartPending => Stage::RestartPending,
        };
        info!("Stage {next:?}");
        self.stage = next;
        self.report.stage = next;
        Ok(next)
    }

    fn finish(mut self) -> SessionOutcome {
        self.report.finished_at = Some(Utc::now());
        match self.restart_module.take() {
            Some(module) => {
                info!("Module {module} hosts the registries and was updated, the host restarts the patcher");
                SessionOutcome::RestartPending {
                    module,
                    report: self.report,
                }
            }
            None => {
                info!("Patch applied successfully");
                SessionOutcome::Completed(self.report)
            }
        }
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let orchestrator = self.orchestrator;
        let Some(step) = &orchestrator.plan.bootstrap else {
            return Ok(());
        };

        let known = self
            .features
            .is_known(&step.feature)
            .await
            .map_err(|e| PatchError::Bootstrap(format!("cannot query feature {}: {e}", step.feature)))?;
        if known {
            info!("No need to set up {}", step.feature);
            self.report.bootstrap = Some(BootstrapOutcome::NotNeeded);
            return Ok(());
        }

        info!("Setting up {} once", step.feature);
        for artifact in &step.artifacts {
            self.install(artifact)?;
        }
        self.features
            .add_repository(&step.repository_uri)
            .await
            .map_err(|e| {
                PatchError::Bootstrap(format!("cannot add repository {}: {e}", step.repository_uri))
            })?;
        let outcome = self.features.install_feature(&step.feature).await?;
        self.report.features.push(FeatureRecord {
            feature: step.feature.clone(),
            outcome,
        });
        self.report.bootstrap = Some(BootstrapOutcome::Performed);
        Ok(())
    }

    fn update_system(&mut self) -> Result<()> {
        info!("Updating system repository");
        let orchestrator = self.orchestrator;
        for artifact in &orchestrator.plan.artifacts {
            self.install(artifact)?;
        }
        Ok(())
    }

    fn install(&mut self, artifact: &ArtifactSpec) -> Result<()> {
        let outcome = self.orchestrator.installer.install_artifact(
            &artifact.payload_key,
            &artifact.repo_path,
            artifact.file_name(),
        )?;
        self.report.artifacts.push(ArtifactRecord {
            file: format!("{}/{}", artifact.repo_path, artifact.file_name()),
            outcome,
        });
        Ok(())
    }

    async fn update_modules(&mut self) -> Result<Stage> {
        info!("Updating modules");
        let orchestrator = self.orchestrator;
        let registry = self.capabilities.modules.clone();

        for directive in &orchestrator.plan.modules {
            let outcome = orchestrator
                .installer
                .update_module(registry.as_ref(), directive)
                .await;
            self.report.modules.push(ModuleRecord {
                symbolic_name: directive.symbolic_name.clone(),
                target_location: directive.target_location.clone(),
                outcome: outcome.kind(),
            });

            match outcome {
                UpdateOutcome::AlreadyCurrent => {}
                UpdateOutcome::ModuleNotFound => {
                    warn!("Module {} not found, skipping", directive.symbolic_name);
                }
                UpdateOutcome::Updated if directive.registry_hosting => {
                    self.restart_module = Some(directive.symbolic_name.clone());
                    return Ok(Stage::RestartPending);
                }
                UpdateOutcome::Updated => {}
                UpdateOutcome::UpdateFailed(e) => {
                    return Err(PatchError::UpdateFailed {
                        symbolic_name: directive.symbolic_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(Stage::BundlesUpdated)
    }

    async fn refresh_repositories(&mut self) {
        info!("Refreshing repository features");
        self.report.refresh = Some(self.features.refresh_repositories().await);
    }

    async fn update_features(&mut self) -> Result<()> {
        info!("Updating features");
        let orchestrator = self.orchestrator;
        for feature in &orchestrator.plan.features {
            let outcome = self.features.install_feature(feature).await?;
            self.report.features.push(FeatureRecord {
                feature: feature.clone(),
                outcome,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for PatchSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchSession")
            .field("stage", &self.stage)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

/// Lifecycle entry point invoked by the host: `start` on activation, `stop` on
/// deactivation. Each activation runs one patch session.
pub struct Patcher {
    orchestrator: UpdateOrchestrator,
    directory: Arc<dyn CapabilityDirectory>,
    context: LoadingContext,
    locator: Option<ServiceLocator>,
}

impl Patcher {
    pub fn new(
        plan: PatchPlan,
        installer: ArtifactInstaller,
        directory: Arc<dyn CapabilityDirectory>,
        context: LoadingContext,
    ) -> Result<Self> {
        plan.validate()?;
        Ok(Self {
            orchestrator: UpdateOrchestrator::new(plan, installer),
            directory,
            context,
            locator: None,
        })
    }

    pub async fn start(&mut self) -> Result<SessionOutcome> {
        if let Some(previous) = self.locator.take() {
            previous.stop();
        }

        let orchestrator = &self.orchestrator;
        let plan = orchestrator.plan();
        let span = info_span!("patch", version = %plan.patch_version);
        let locator = ServiceLocator::new(self.directory.clone(), self.context.clone())
            .with_default_timeout(plan.resolve_timeout());
        let locator: &ServiceLocator = self.locator.insert(locator);

        async {
            info!("Patching with {}", plan.patch_version);
            let result = orchestrator.run(locator).await;
            if matches!(result, Ok(SessionOutcome::RestartPending { .. })) {
                info!("Restarting patcher");
            }
            result
        }
        .instrument(span)
        .await
    }

    pub fn stop(&mut self) {
        if let Some(locator) = self.locator.take() {
            locator.stop();
        }
        info!("Stopping patcher");
    }

    pub fn diagnostics(&self) -> Vec<crate::capability::LocatorDiagnostic> {
        self.locator
            .as_ref()
            .map(ServiceLocator::diagnostics)
            .unwrap_or_default()
    }
}

impl fmt::Debug for Patcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patcher")
            .field("orchestrator", &self.orchestrator)
            .field("context", &self.context)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}
