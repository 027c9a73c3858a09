//! ---
//! kdm_section: "02-artifact-repository"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Filesystem layout and version bookkeeping for kernel artifacts."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use kdm_common::{BuildVersion, TenantId};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{ArtifactError, Result};

/// A kernel build stored in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArtifact {
    /// Tenant owning the artifact.
    pub tenant: TenantId,
    /// Build version of the artifact.
    pub version: BuildVersion,
    /// On-disk location of the artifact (single file or exploded directory).
    pub path: PathBuf,
    /// SHA-256 digest over the artifact contents.
    pub digest: String,
    /// Total size of all files making up the artifact.
    pub size_bytes: u64,
}

/// On-disk build-artifact repository.
///
/// Layout: `<root>/<tenant>/<build-version>/` with each version directory
/// holding either a single kernel archive or an exploded kernel
/// distribution tree.
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    root: PathBuf,
}

impl ArtifactRepository {
    /// Open the repository at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the repository.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    fn version_dir(&self, tenant: &TenantId, version: &BuildVersion) -> PathBuf {
        self.tenant_dir(tenant).join(version.as_str())
    }

    /// Whether a build version is present for the tenant.
    #[must_use]
    pub fn contains(&self, tenant: &TenantId, version: &BuildVersion) -> bool {
        self.version_dir(tenant, version).is_dir()
    }

    /// Import a kernel artifact from `source` under the tenant/version entry.
    ///
    /// A single file is copied as-is; a directory is copied recursively.
    /// Re-importing an existing version is idempotent: the stored entry is
    /// kept and resolved instead of being overwritten.
    pub fn import(
        &self,
        tenant: &TenantId,
        version: &BuildVersion,
        source: &Path,
    ) -> Result<KernelArtifact> {
        if !source.exists() {
            return Err(ArtifactError::SourceMissing(source.to_path_buf()));
        }

        let dest = self.version_dir(tenant, version);
        if dest.is_dir() {
            debug!(tenant = %tenant, version = %version, "artifact already stored, keeping existing entry");
            return self.resolve(tenant, version);
        }
        fs::create_dir_all(&dest)?;

        if source.is_dir() {
            copy_tree(source, &dest)?;
        } else {
            let file_name = source
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("kernel.zip"));
            fs::copy(source, dest.join(file_name))?;
        }

        let artifact = self.resolve(tenant, version)?;
        info!(
            tenant = %tenant,
            version = %version,
            digest = %artifact.digest,
            size_bytes = artifact.size_bytes,
            "kernel artifact imported"
        );
        Ok(artifact)
    }

    /// Resolve a stored artifact entry, computing its digest and size.
    pub fn resolve(&self, tenant: &TenantId, version: &BuildVersion) -> Result<KernelArtifact> {
        let dir = self.version_dir(tenant, version);
        if !dir.is_dir() {
            if !self.tenant_dir(tenant).is_dir() {
                return Err(ArtifactError::TenantMissing {
                    tenant: tenant.to_string(),
                });
            }
            return Err(ArtifactError::VersionMissing {
                tenant: tenant.to_string(),
                version: version.to_string(),
            });
        }

        let (digest, size_bytes, file_count) = digest_tree(&dir)?;
        if file_count == 0 {
            return Err(ArtifactError::EmptyArtifact {
                tenant: tenant.to_string(),
                version: version.to_string(),
            });
        }

        // A single-file entry resolves to the file itself; exploded
        // distributions resolve to the directory.
        let path = single_file_entry(&dir)?.unwrap_or(dir);

        Ok(KernelArtifact {
            tenant: tenant.clone(),
            version: version.clone(),
            path,
            digest,
            size_bytes,
        })
    }

    /// All build versions stored for the tenant, in ascending release order.
    pub fn list_versions(&self, tenant: &TenantId) -> Result<Vec<BuildVersion>> {
        let dir = self.tenant_dir(tenant);
        if !dir.is_dir() {
            return Err(ArtifactError::TenantMissing {
                tenant: tenant.to_string(),
            });
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                versions.push(BuildVersion::new(entry.file_name().to_string_lossy()));
            }
        }
        versions.sort_by(|a, b| a.cmp_precedence(b));
        Ok(versions)
    }

    /// Versions stored for the tenant that fall under the base version scope.
    pub fn list_matching(
        &self,
        tenant: &TenantId,
        base: &BuildVersion,
    ) -> Result<Vec<BuildVersion>> {
        Ok(self
            .list_versions(tenant)?
            .into_iter()
            .filter(|version| version.matches_base(base))
            .collect())
    }

    /// Versions under the base scope that are ordered strictly below `current`.
    pub fn list_lower(
        &self,
        tenant: &TenantId,
        base: &BuildVersion,
        current: &BuildVersion,
    ) -> Result<Vec<BuildVersion>> {
        Ok(self
            .list_matching(tenant, base)?
            .into_iter()
            .filter(|version| version.precedes(current))
            .collect())
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields paths under its root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Digest all files under `dir` in a stable order, keyed by relative path.
fn digest_tree(dir: &Path) -> Result<(String, u64, usize)> {
    let mut hasher = Sha256::new();
    let mut size_bytes = 0u64;
    let mut file_count = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .expect("walkdir yields paths under its root");
        hasher.update(relative.to_string_lossy().as_bytes());
        let contents = fs::read(entry.path())?;
        size_bytes += contents.len() as u64;
        hasher.update(&contents);
        file_count += 1;
    }

    Ok((format!("{:x}", hasher.finalize()), size_bytes, file_count))
}

fn single_file_entry(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() || !first.file_type()?.is_file() {
        return Ok(None);
    }
    Ok(Some(first.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).expect("create source file");
        file.write_all(contents).expect("write source file");
        path
    }

    #[test]
    fn import_and_resolve_single_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = ArtifactRepository::open(temp.path().join("repo")).expect("open repo");
        let source = write_source(temp.path(), "kernel-4.4.1.zip", b"kernel bytes");

        let tenant = TenantId::new("acme");
        let version = BuildVersion::new("4.4.1");
        let artifact = repo.import(&tenant, &version, &source).expect("import");

        assert!(artifact.path.ends_with("kernel-4.4.1.zip"));
        assert_eq!(artifact.size_bytes, b"kernel bytes".len() as u64);
        assert_eq!(artifact, repo.resolve(&tenant, &version).expect("resolve"));
    }

    #[test]
    fn reimport_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = ArtifactRepository::open(temp.path().join("repo")).expect("open repo");
        let source = write_source(temp.path(), "kernel.zip", b"first");

        let tenant = TenantId::new("acme");
        let version = BuildVersion::new("1.0.0");
        let first = repo.import(&tenant, &version, &source).expect("import");

        let changed = write_source(temp.path(), "kernel.zip", b"second import is ignored");
        let second = repo.import(&tenant, &version, &changed).expect("reimport");
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn import_exploded_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = ArtifactRepository::open(temp.path().join("repo")).expect("open repo");

        let exploded = temp.path().join("carbon-home");
        fs::create_dir_all(exploded.join("bin")).expect("mkdir");
        write_source(&exploded, "version.txt", b"4.4.2");
        write_source(&exploded.join("bin"), "kernel.sh", b"#!/bin/sh");

        let tenant = TenantId::new("acme");
        let version = BuildVersion::new("4.4.2");
        let artifact = repo.import(&tenant, &version, &exploded).expect("import");

        assert!(artifact.path.is_dir());
        assert_eq!(artifact.size_bytes, 14);
    }

    #[test]
    fn missing_entries_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = ArtifactRepository::open(temp.path().join("repo")).expect("open repo");
        let tenant = TenantId::new("ghost");

        assert!(matches!(
            repo.list_versions(&tenant),
            Err(ArtifactError::TenantMissing { .. })
        ));

        let source = write_source(temp.path(), "kernel.zip", b"bytes");
        repo.import(&tenant, &BuildVersion::new("1.0.0"), &source)
            .expect("import");
        assert!(matches!(
            repo.resolve(&tenant, &BuildVersion::new("2.0.0")),
            Err(ArtifactError::VersionMissing { .. })
        ));
    }

    #[test]
    fn listings_are_scoped_and_ordered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = ArtifactRepository::open(temp.path().join("repo")).expect("open repo");
        let source = write_source(temp.path(), "kernel.zip", b"bytes");

        let tenant = TenantId::new("acme");
        for version in ["4.4.2", "4.4.10", "4.4.1", "5.0.0"] {
            repo.import(&tenant, &BuildVersion::new(version), &source)
                .expect("import");
        }

        let base = BuildVersion::new("4.4");
        let matching = repo.list_matching(&tenant, &base).expect("list");
        let names: Vec<&str> = matching.iter().map(BuildVersion::as_str).collect();
        assert_eq!(names, ["4.4.1", "4.4.2", "4.4.10"]);

        let lower = repo
            .list_lower(&tenant, &base, &BuildVersion::new("4.4.2"))
            .expect("list lower");
        let names: Vec<&str> = lower.iter().map(BuildVersion::as_str).collect();
        assert_eq!(names, ["4.4.1"]);
    }
}
