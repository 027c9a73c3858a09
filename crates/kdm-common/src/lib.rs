//! ---
//! kdm_section: "01-core-functionality"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Shared primitives and utilities for the deployment manager."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
//! Core shared primitives for the KDM workspace.
//! This crate exposes the tenant and build-version domain types,
//! configuration loading, and version metadata consumed across the
//! workspace.
#![warn(missing_docs)]

pub mod config;
pub mod types;
pub mod version;

pub use config::{
    AppConfig, ArtifactConfig, LoadedAppConfig, RuntimeConfig, ServiceConfig, StateConfig,
};
pub use types::{BuildVersion, TenantId};
pub use version::VersionInfo;
