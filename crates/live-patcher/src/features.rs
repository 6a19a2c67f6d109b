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

//! Feature repository refresh and feature installation

use crate::error::{HostError, PatchError, Result};
use crate::host::FeatureRegistry;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Result of a repository refresh. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshReport {
    Refreshed { uris: Vec<String> },
    Failed { uris: Vec<String>, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOutcome {
    Installed,
    AlreadyInstalled,
}

pub struct FeatureCoordinator {
    registry: Arc<dyn FeatureRegistry>,
}

impl FeatureCoordinator {
    pub fn new(registry: Arc<dyn FeatureRegistry>) -> Self {
        Self { registry }
    }

    /// Refresh every known feature repository.
    ///
    /// A stale feature index degrades functionality but does not corrupt
    /// state, so enumeration and refresh errors are logged and absorbed.
    pub async fn refresh_repositories(&self) -> RefreshReport {
        let uris = match self.registry.repositories().await {
            Ok(listed) => dedup_stable(listed),
            Err(e) => {
                error!("Error listing feature repositories: {e}");
                return RefreshReport::Failed {
                    uris: Vec::new(),
                    reason: e.to_string(),
                };
            }
        };

        let joined = uris.join("\n");
        info!("Refreshing repository features urls: {joined}");
        match self.registry.refresh_repositories(&uris).await {
            Ok(()) => RefreshReport::Refreshed { uris },
            Err(e) => {
                error!("Error refreshing {joined}: {e}");
                RefreshReport::Failed {
                    uris,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Install `feature`; features the host already runs are skipped
    pub async fn install_feature(&self, feature: &str) -> Result<FeatureOutcome> {
        let rejected = |e: HostError| PatchError::FeatureInstall {
            feature: feature.to_owned(),
            reason: e.to_string(),
        };

        if self.registry.is_installed(feature).await.map_err(rejected)? {
            info!("Feature {feature} already installed");
            return Ok(FeatureOutcome::AlreadyInstalled);
        }

        info!("Installing {feature} feature");
        self.registry.install_feature(feature).await.map_err(rejected)?;
        Ok(FeatureOutcome::Installed)
    }

    pub async fn is_known(&self, feature: &str) -> std::result::Result<bool, HostError> {
        self.registry.is_known(feature).await
    }

    pub async fn add_repository(&self, uri: &str) -> std::result::Result<(), HostError> {
        info!("Adding feature repository {uri}");
        self.registry.add_repository(uri).await
    }
}

impl fmt::Debug for FeatureCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCoordinator").finish_non_exhaustive()
    }
}

fn dedup_stable(uris: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    uris.into_iter()
        .filter(|uri| seen.insert(uri.clone()))
        .collect()
}
