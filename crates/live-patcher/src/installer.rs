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

//! Artifact installation into the managed repository and in-place module updates

use crate::error::{FetchError, HostError, PatchError, Result};
use crate::fetcher::ArtifactFetcher;
use crate::host::{ModuleIdentity, ModuleRegistry, NormalizedArtifact};
use crate::payload::PayloadSource;
use crate::repository::RepositoryRoot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

/// One desired module update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDirective {
    pub symbolic_name: String,
    pub target_location: String,
    /// The module implements part of the host registries; updating it tears down
    /// the running patch session.
    #[serde(default)]
    pub registry_hosting: bool,
}

impl UpdateDirective {
    pub fn new(symbolic_name: impl Into<String>, target_location: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            target_location: target_location.into(),
            registry_hosting: false,
        }
    }

    #[must_use]
    pub fn registry_hosting(mut self) -> Self {
        self.registry_hosting = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    /// The repository already holds identical content
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to enumerate modules: {0}")]
    Enumerate(#[source] HostError),

    #[error("failed to open {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: FetchError,
    },

    #[error("module update rejected: {0}")]
    Update(#[source] HostError),

    #[error("refresh failed: {0}")]
    Refresh(#[source] HostError),
}

#[derive(Debug)]
pub enum UpdateOutcome {
    AlreadyCurrent,
    Updated,
    ModuleNotFound,
    UpdateFailed(UpdateError),
}

impl UpdateOutcome {
    /// Reportable form, without the failure detail
    pub fn kind(&self) -> ModuleOutcome {
        match self {
            Self::AlreadyCurrent => ModuleOutcome::AlreadyCurrent,
            Self::Updated => ModuleOutcome::Updated,
            Self::ModuleNotFound => ModuleOutcome::ModuleNotFound,
            Self::UpdateFailed(_) => ModuleOutcome::UpdateFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOutcome {
    AlreadyCurrent,
    Updated,
    ModuleNotFound,
    UpdateFailed,
}

/// Copies patch payloads into the repository and updates modules in place
pub struct ArtifactInstaller {
    repository: RepositoryRoot,
    payloads: Arc<dyn PayloadSource>,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl ArtifactInstaller {
    pub fn new(
        repository: RepositoryRoot,
        payloads: Arc<dyn PayloadSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            repository,
            payloads,
            fetcher,
        }
    }

    pub fn repository(&self) -> &RepositoryRoot {
        &self.repository
    }

    /// Copy payload `payload_key` to `repo_path/file_name` inside the repository.
    ///
    /// Directories are created on demand. An existing file is replaced
    /// atomically unless it already has the same content.
    pub fn install_artifact(
        &self,
        payload_key: &str,
        repo_path: &str,
        file_name: &str,
    ) -> Result<InstallOutcome> {
        let target = self.repository.file_path(repo_path, file_name)?;

        let content = self.read_payload(payload_key)?;
        let digest = sha256_hex(&content);

        let write_failure = |source: io::Error| PatchError::RepositoryWrite {
            path: target.clone(),
            source,
        };

        if file_digest(&target).map_err(write_failure)?.as_deref() == Some(digest.as_str()) {
            info!("{} already present in {repo_path}", file_name);
            return Ok(InstallOutcome::AlreadyPresent);
        }

        let directory = target
            .parent()
            .ok_or_else(|| write_failure(io::Error::other("target has no parent directory")))?;
        fs::create_dir_all(directory).map_err(write_failure)?;

        let mut staged = NamedTempFile::new_in(directory).map_err(write_failure)?;
        staged.write_all(&content).map_err(write_failure)?;
        staged.as_file().sync_all().map_err(write_failure)?;
        staged
            .persist(&target)
            .map_err(|e| write_failure(e.error))?;

        info!("Installed {payload_key} as {} ({digest})", target.display());
        Ok(InstallOutcome::Installed)
    }

    fn read_payload(&self, key: &str) -> Result<Vec<u8>> {
        let missing = |e: io::Error| {
            warn!("Cannot open payload {key}: {e}");
            PatchError::PayloadMissing { key: key.to_owned() }
        };
        let mut reader = self.payloads.open(key).map_err(missing)?;
        let mut content = Vec::new();
        reader.read_to_end(&mut content).map_err(missing)?;
        Ok(content)
    }

    /// Update the module named by `directive` to its target location.
    ///
    /// A module that is absent, or whose location or update location already
    /// equals the target, is left untouched.
    pub async fn update_module(
        &self,
        registry: &dyn ModuleRegistry,
        directive: &UpdateDirective,
    ) -> UpdateOutcome {
        info!(
            "Updating {} with {}",
            directive.symbolic_name, directive.target_location
        );

        let modules = match registry.installed_modules().await {
            Ok(modules) => modules,
            Err(e) => return UpdateOutcome::UpdateFailed(UpdateError::Enumerate(e)),
        };
        let Some(module) = modules
            .into_iter()
            .find(|m| m.symbolic_name == directive.symbolic_name)
        else {
            info!("Module {} is not installed", directive.symbolic_name);
            return UpdateOutcome::ModuleNotFound;
        };

        let update_location = match registry.update_location(module.id).await {
            Ok(location) => location,
            Err(e) => {
                warn!(
                    "Issue retrieving update location for module {}/{}, falling back to install location: {e}",
                    module.symbolic_name, module.id.0
                );
                module.location.clone()
            }
        };
        let identity = ModuleIdentity {
            symbolic_name: module.symbolic_name,
            current_location: module.location,
            current_update_location: update_location,
        };
        info!("Current location {}", identity.current_location);
        info!("Current update location {}", identity.current_update_location);

        if identity.is_current(&directive.target_location) {
            info!("Already up-to-date");
            return UpdateOutcome::AlreadyCurrent;
        }

        let content = match self.fetcher.fetch(&directive.target_location).await {
            Ok(content) => content,
            Err(source) => {
                return UpdateOutcome::UpdateFailed(UpdateError::Fetch {
                    location: directive.target_location.clone(),
                    source,
                });
            }
        };

        let artifact = normalize(content, &directive.target_location);
        if let Err(e) = registry.update(module.id, artifact).await {
            return UpdateOutcome::UpdateFailed(UpdateError::Update(e));
        }
        if let Err(e) = registry.refresh(&[module.id]).await {
            return UpdateOutcome::UpdateFailed(UpdateError::Refresh(e));
        }

        info!(
            "Module {} updated to {}",
            identity.symbolic_name, directive.target_location
        );
        UpdateOutcome::Updated
    }
}

impl fmt::Debug for ArtifactInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactInstaller")
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

/// Attach the location the artifact was fetched from as its update location.
///
/// The content is passed through unchanged. The location travels next to it
/// and the module registry records it for the module, so the next gate check
/// sees the target as the current update location.
fn normalize(content: Vec<u8>, target_location: &str) -> NormalizedArtifact {
    NormalizedArtifact {
        content,
        update_location: target_location.to_owned(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn file_digest(path: &Path) -> io::Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(Some(format!("{:x}", hasher.finalize())))
}
