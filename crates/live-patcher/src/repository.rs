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

//! Managed artifact repository layout

use crate::error::{FetchError, PatchError, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Environment variable holding the host base directory
pub const HOST_BASE_VAR: &str = "PATCH_HOST_BASE";
const FALLBACK_HOST_BASE_VAR: &str = "KARAF_BASE";
const SYSTEM_DIR: &str = "system";

/// Root of the managed repository (`<host-base>/system`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRoot {
    root: PathBuf,
}

impl RepositoryRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository under the host base directory
    pub fn under_host_base(base: impl AsRef<Path>) -> Self {
        Self::new(base.as_ref().join(SYSTEM_DIR))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`] with an explicit variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = lookup(HOST_BASE_VAR)
            .or_else(|| lookup(FALLBACK_HOST_BASE_VAR))
            .filter(|base| !base.trim().is_empty())
            .ok_or_else(|| {
                PatchError::Config(format!(
                    "host base directory not set ({HOST_BASE_VAR} or {FALLBACK_HOST_BASE_VAR})"
                ))
            })?;
        Ok(Self::under_host_base(base))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `repo_path/file_name` inside the repository
    pub fn file_path(&self, repo_path: &str, file_name: &str) -> Result<PathBuf> {
        check_relative(repo_path)?;
        check_relative(file_name)?;
        if file_name.is_empty() || file_name.contains('/') {
            return Err(PatchError::Config(format!("invalid file name {file_name:?}")));
        }
        Ok(self.root.join(repo_path).join(file_name))
    }

    pub fn artifact_path(&self, coordinates: &MavenCoordinates) -> PathBuf {
        self.root.join(coordinates.relative_path())
    }
}

/// Reject paths that would escape the repository root
pub(crate) fn check_relative(path: &str) -> Result<()> {
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PatchError::Config(format!(
            "repository path {path:?} must be relative and stay inside the repository"
        )));
    }
    Ok(())
}

/// Parsed `mvn:group/artifact/version[/type[/classifier]]` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
    pub classifier: Option<String>,
}

impl MavenCoordinates {
    pub fn parse(location: &str) -> std::result::Result<Self, FetchError> {
        let invalid = |reason: &str| FetchError::InvalidMavenLocation {
            location: location.to_owned(),
            reason: reason.to_owned(),
        };

        let coordinates = location
            .strip_prefix("mvn:")
            .ok_or_else(|| invalid("missing mvn: scheme"))?;
        if coordinates.contains('!') {
            return Err(invalid("inline repository URLs are not supported"));
        }

        let parts: Vec<&str> = coordinates.split('/').collect();
        if !(3..=5).contains(&parts.len()) || parts.iter().take(3).any(|p| p.is_empty()) {
            return Err(invalid("expected group/artifact/version[/type[/classifier]]"));
        }
        if parts.iter().any(|p| *p == ".." || p.contains('\\')) {
            return Err(invalid("path segments are not allowed"));
        }

        let non_empty = |index: usize| {
            parts
                .get(index)
                .filter(|p| !p.is_empty())
                .map(|p| (*p).to_owned())
        };

        Ok(Self {
            group_id: parts[0].to_owned(),
            artifact_id: parts[1].to_owned(),
            version: parts[2].to_owned(),
            packaging: non_empty(3).unwrap_or_else(|| "jar".to_owned()),
            classifier: non_empty(4),
        })
    }

    /// Directory of the artifact, e.g. `org/apache/karaf/features/standard/4.2.7`
    pub fn directory(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version
        )
    }

    /// File name, e.g. `standard-4.2.7-features.xml`
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{classifier}.{}",
                self.artifact_id, self.version, self.packaging
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.packaging),
        }
    }

    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.directory(), self.file_name())
    }
}

impl fmt::Display for MavenCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mvn:{}/{}/{}", self.group_id, self.artifact_id, self.version)?;
        match &self.classifier {
            Some(classifier) => write!(f, "/{}/{classifier}", self.packaging),
            None if self.packaging != "jar" => write!(f, "/{}", self.packaging),
            None => Ok(()),
        }
    }
}
