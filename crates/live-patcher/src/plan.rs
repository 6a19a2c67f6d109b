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

//! Patch plan: the deployment-specific set of artifacts, modules and features

use crate::error::{PatchError, Result};
use crate::installer::UpdateDirective;
use crate::repository::check_relative;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_10() -> u64 {
    10
}

/// Payload copied into the managed repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub payload_key: String,

    /// Directory inside the repository, e.g. `org/apache/karaf/features/standard/4.2.7`
    pub repo_path: String,

    /// Stored file name; defaults to the payload key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl ArtifactSpec {
    pub fn new(payload_key: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            payload_key: payload_key.into(),
            repo_path: repo_path.into(),
            file_name: None,
        }
    }

    #[must_use]
    pub fn renamed(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(&self.payload_key)
    }
}

/// One-time setup performed only while `feature` is unknown to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub feature: String,

    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,

    /// Feature repository declaring `feature`
    pub repository_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPlan {
    pub patch_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapStep>,

    /// Copied in order during the system stage
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,

    /// Applied in order during the module stage
    #[serde(default)]
    pub modules: Vec<UpdateDirective>,

    /// Installed in order during the feature stage
    #[serde(default)]
    pub features: Vec<String>,

    /// How long to wait for each host capability
    #[serde(default = "default_10")]
    pub resolve_timeout_secs: u64,

    /// Remote maven repositories consulted when a module location is not in the
    /// managed repository
    #[serde(default)]
    pub remote_repositories: Vec<String>,
}

impl PatchPlan {
    pub fn new(patch_version: impl Into<String>) -> Self {
        Self {
            patch_version: patch_version.into(),
            bootstrap: None,
            artifacts: Vec::new(),
            modules: Vec::new(),
            features: Vec::new(),
            resolve_timeout_secs: default_10(),
            remote_repositories: Vec::new(),
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.patch_version.trim().is_empty() {
            return Err(PatchError::Config("patch_version must not be empty".to_owned()));
        }

        let bootstrap_artifacts = self.bootstrap.iter().flat_map(|b| b.artifacts.iter());
        for artifact in self.artifacts.iter().chain(bootstrap_artifacts) {
            if artifact.payload_key.is_empty() {
                return Err(PatchError::Config("artifact payload_key must not be empty".to_owned()));
            }
            check_relative(&artifact.repo_path)?;
        }

        if let Some(bootstrap) = &self.bootstrap
            && (bootstrap.feature.is_empty() || bootstrap.repository_uri.is_empty())
        {
            return Err(PatchError::Config(
                "bootstrap needs a feature and a repository_uri".to_owned(),
            ));
        }

        for directive in &self.modules {
            if directive.symbolic_name.is_empty() || directive.target_location.is_empty() {
                return Err(PatchError::Config(
                    "module directives need a symbolic_name and a target_location".to_owned(),
                ));
            }
        }
        if self.modules.iter().filter(|d| d.registry_hosting).count() > 1 {
            return Err(PatchError::Config(
                "at most one module directive may be registry_hosting".to_owned(),
            ));
        }

        if self.features.iter().any(String::is_empty) {
            return Err(PatchError::Config("feature names must not be empty".to_owned()));
        }

        if self.resolve_timeout_secs == 0 {
            return Err(PatchError::Config("resolve_timeout_secs must be positive".to_owned()));
        }

        Ok(())
    }
}

pub fn load_plan(path: &Path) -> Result<PatchPlan> {
    let content = std::fs::read_to_string(path)?;
    let plan: PatchPlan = serde_json::from_str(&content)
        .map_err(|e| PatchError::Config(format!("Failed to parse patch plan: {e}")))?;
    plan.validate()?;
    Ok(plan)
}

pub fn save_plan(plan: &PatchPlan, path: &Path) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(plan)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}
