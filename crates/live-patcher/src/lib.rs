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

//! live-patcher - patches a running modular container in place
//!
//! A patch session copies shipped artifacts into the managed repository,
//! updates installed modules to new locations, refreshes feature repositories
//! and installs features, while the container keeps running. The session waits
//! for the host capabilities it needs, skips work that is already applied and
//! stops cleanly when updating a module tears down its own registries.

pub mod capability;
pub mod error;
pub mod features;
pub mod fetcher;
pub mod host;
pub mod installer;
pub mod logging;
pub mod orchestrator;
pub mod payload;
pub mod plan;
pub mod repository;

pub use capability::{
    CapabilityDirectory, CapabilityHandle, CapabilityId, InMemoryDirectory, LoadingContext,
    ServiceLocator,
};
pub use error::{FetchError, HostError, PatchError};
pub use installer::{
    ArtifactInstaller, InstallOutcome, ModuleOutcome, UpdateDirective, UpdateOutcome,
};
pub use orchestrator::{Patcher, SessionOutcome, SessionReport, Stage, UpdateOrchestrator};
pub use plan::{ArtifactSpec, BootstrapStep, PatchPlan};
