//! ---
//! kdm_section: "02-artifact-repository"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Build-artifact repository abstractions."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
#![warn(missing_docs)]

use std::path::PathBuf;

/// Result alias used throughout the artifacts crate.
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Error type for the artifact repository subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Wrapper for IO errors encountered while reading/writing repository files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for directory traversal failures.
    #[error("repository walk error: {0}")]
    Walk(#[from] walkdir::Error),
    /// Reported when a tenant has no entry in the repository.
    #[error("tenant {tenant} has no artifacts in the repository")]
    TenantMissing {
        /// Tenant without a repository tree.
        tenant: String,
    },
    /// Reported when a build version is absent for a tenant.
    #[error("build version {version} not found for tenant {tenant}")]
    VersionMissing {
        /// Tenant the lookup was scoped to.
        tenant: String,
        /// Missing build version.
        version: String,
    },
    /// Reported when an import source path does not exist.
    #[error("kernel artifact source {0} does not exist")]
    SourceMissing(PathBuf),
    /// Reported when a stored artifact entry contains no files.
    #[error("artifact entry for tenant {tenant} version {version} is empty")]
    EmptyArtifact {
        /// Tenant the entry belongs to.
        tenant: String,
        /// Build version of the empty entry.
        version: String,
    },
}

pub mod repository;

pub use repository::{ArtifactRepository, KernelArtifact};
