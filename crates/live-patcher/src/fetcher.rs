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

//! Opening artifact content from a module location
//!
//! Supported locations:
//! - `mvn:` coordinates, looked up in the managed repository first, then in the
//!   configured remote repositories
//! - `file:` paths
//! - `http://` and `https://` URLs

use crate::error::FetchError;
use crate::repository::{MavenCoordinates, RepositoryRoot};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::path::Path;

const USER_AGENT: &str = concat!("live-patcher/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Read the full artifact stored at `location`
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher backed by the managed repository and plain HTTP
#[derive(Debug, Clone)]
pub struct LocationFetcher {
    repository: RepositoryRoot,
    remote_repositories: Vec<String>,
    client: reqwest::Client,
}

impl LocationFetcher {
    pub fn new(repository: RepositoryRoot, remote_repositories: Vec<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Download(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            repository,
            remote_repositories,
            client,
        })
    }

    async fn fetch_maven(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let coordinates = MavenCoordinates::parse(location)?;

        let local = self.repository.artifact_path(&coordinates);
        if tokio::fs::try_exists(&local).await? {
            tracing::debug!("Resolved {location} from {}", local.display());
            return Ok(tokio::fs::read(&local).await?);
        }

        let mut last_error = None;
        for base in &self.remote_repositories {
            let url = format!("{}/{}", base.trim_end_matches('/'), coordinates.relative_path());
            match self.download(&url).await {
                Ok(bytes) => {
                    tracing::debug!("Resolved {location} from {url}");
                    return Ok(bytes);
                }
                Err(FetchError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!("Failed to fetch {url}: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::NotFound(location.to_owned())))
    }

    async fn fetch_file(path: &str) -> Result<Vec<u8>, FetchError> {
        let path = path.strip_prefix("//").unwrap_or(path);
        match tokio::fs::read(Path::new(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(format!("file:{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Download(format!("Request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_owned()));
        }
        if !response.status().is_success() {
            return Err(FetchError::Download(format!(
                "Download of {url} failed with status: {}",
                response.status()
            )));
        }

        let mut content = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Download(format!("Failed to read body: {e}")))?;
            content.extend_from_slice(&chunk);
        }
        Ok(content)
    }
}

#[async_trait]
impl ArtifactFetcher for LocationFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        if location.starts_with("mvn:") {
            self.fetch_maven(location).await
        } else if let Some(path) = location.strip_prefix("file:") {
            Self::fetch_file(path).await
        } else if location.starts_with("http://") || location.starts_with("https://") {
            self.download(location).await
        } else {
            Err(FetchError::UnsupportedLocation(location.to_owned()))
        }
    }
}
