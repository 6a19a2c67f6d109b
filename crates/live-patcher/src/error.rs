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

//! Error types for the patcher crate

use std::path::PathBuf;
use thiserror::Error;

use crate::capability::CapabilityId;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("capability {id} did not become available within {timeout_secs}s")]
    CapabilityTimeout { id: CapabilityId, timeout_secs: u64 },

    #[error("capability {id} unavailable: {reason}")]
    CapabilityUnavailable { id: CapabilityId, reason: String },

    #[error("payload {key} is missing")]
    PayloadMissing { key: String },

    #[error("failed to write {path}: {source}")]
    RepositoryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("update of module {symbolic_name} failed: {reason}")]
    UpdateFailed {
        symbolic_name: String,
        reason: String,
    },

    #[error("installation of feature {feature} failed: {reason}")]
    FeatureInstall { feature: String, reason: String },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PatchError>;

/// Error reported by a host capability implementation
#[derive(Debug, Error)]
pub enum HostError {
    #[error("rejected by host: {0}")]
    Rejected(String),

    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("host io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error opening an artifact stream from a location
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported location: {0}")]
    UnsupportedLocation(String),

    #[error("invalid maven location {location}: {reason}")]
    InvalidMavenLocation { location: String, reason: String },

    #[error("artifact {0} not found in any repository")]
    NotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("fetch io error: {0}")]
    Io(#[from] std::io::Error),
}
