//! ---
//! kdm_section: "01-core-functionality"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Tenant and build-version domain newtypes."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Name of a tenant owning an isolated kernel deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_owned())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is usable (non-empty after trimming).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier distinguishing one kernel artifact release from another.
///
/// Ordering is semver-first: identifiers that parse as semantic versions
/// (purely numeric identifiers are zero-padded to three components, so
/// `4.4` sorts as `4.4.0`) compare by semver precedence, anything else
/// falls back to lexicographic comparison. This mirrors how release feeds
/// are sorted elsewhere in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildVersion(String);

impl BuildVersion {
    /// Create a new build version identifier.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into().trim().to_owned())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Attempt a semantic-version interpretation of the identifier.
    ///
    /// Purely numeric identifiers with fewer than three components are
    /// zero-padded before parsing (`2.4` becomes `2.4.0`).
    #[must_use]
    pub fn semver(&self) -> Option<Version> {
        if let Ok(version) = Version::parse(&self.0) {
            return Some(version);
        }
        let parts: Vec<&str> = self.0.split('.').collect();
        if parts.len() < 3
            && parts
                .iter()
                .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
        {
            let mut padded: Vec<String> = parts.iter().map(|part| (*part).to_owned()).collect();
            while padded.len() < 3 {
                padded.push("0".to_owned());
            }
            return Version::parse(&padded.join(".")).ok();
        }
        None
    }

    /// Compare two identifiers by release precedence.
    #[must_use]
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        match (self.semver(), other.semver()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }

    /// Whether this version is ordered strictly below `other`.
    #[must_use]
    pub fn precedes(&self, other: &Self) -> bool {
        self.cmp_precedence(other) == Ordering::Less
    }

    /// Whether this identifier falls under the given base version scope.
    ///
    /// A version matches the base when it equals it or extends it at a
    /// component boundary: `4.4` covers `4.4.1` and `4.4.1-rc1` but not
    /// `4.41`.
    #[must_use]
    pub fn matches_base(&self, base: &Self) -> bool {
        if self.0 == base.0 {
            return true;
        }
        match self.0.strip_prefix(base.0.as_str()) {
            Some(rest) => rest.starts_with(['.', '-', '+']),
            None => false,
        }
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BuildVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_trims_input() {
        let tenant = TenantId::new("  acme  ");
        assert_eq!(tenant.as_str(), "acme");
        assert!(tenant.is_valid());
        assert!(!TenantId::new("   ").is_valid());
    }

    #[test]
    fn numeric_versions_are_zero_padded() {
        let short = BuildVersion::new("2.4");
        assert_eq!(short.semver(), Version::parse("2.4.0").ok());
    }

    #[test]
    fn precedence_follows_semver_when_parseable() {
        let older = BuildVersion::new("4.4.9");
        let newer = BuildVersion::new("4.4.10");
        assert!(older.precedes(&newer));
        // Lexicographic comparison would get this wrong.
        assert!(older.as_str() > newer.as_str());
    }

    #[test]
    fn precedence_falls_back_to_lexicographic() {
        let a = BuildVersion::new("build-a");
        let b = BuildVersion::new("build-b");
        assert!(a.precedes(&b));
    }

    #[test]
    fn base_matching_respects_component_boundaries() {
        let base = BuildVersion::new("4.4");
        assert!(BuildVersion::new("4.4").matches_base(&base));
        assert!(BuildVersion::new("4.4.1").matches_base(&base));
        assert!(BuildVersion::new("4.4.1-rc1").matches_base(&base));
        assert!(!BuildVersion::new("4.41").matches_base(&base));
        assert!(!BuildVersion::new("5.0.0").matches_base(&base));
    }
}
