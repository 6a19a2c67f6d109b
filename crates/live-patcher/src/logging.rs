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

//! Tracing setup for hosts that do not install their own subscriber
//!
//! Session lines carry the `patch{version=..}` span as their stable prefix.

use crate::error::{PatchError, Result};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "live_patcher=info";

/// Build the filter from `RUST_LOG`, adding `directive` on top
pub fn env_filter(directive: &str) -> Result<EnvFilter> {
    let directive = directive
        .parse()
        .map_err(|e| PatchError::Config(format!("invalid log directive {directive:?}: {e}")))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(directive: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(directive)?)
        .with_target(false)
        .try_init()
        .map_err(|e| PatchError::Config(format!("failed to install tracing subscriber: {e}")))
}
