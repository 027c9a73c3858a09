//! ---
//! kdm_section: "01-core-functionality"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Configuration loading for the deployment manager."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use kdm_logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

/// Default candidate paths inspected when no explicit config is given.
pub const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["/etc/kdm/config.toml", "kdm.toml"];

/// Primary configuration object for the KDM runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Build-artifact repository settings.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    /// Deployment state persistence settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Service endpoint allocation settings.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Replica runtime settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Logging sink settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    /// The parsed and validated configuration.
    pub config: AppConfig,
    /// Path the configuration was read from.
    pub source: PathBuf,
}

impl AppConfig {
    /// Environment variable overriding the configuration path.
    pub const ENV_CONFIG_PATH: &'static str = "KDM_CONFIG";

    /// Load configuration from disk, respecting the `KDM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_replicas == 0 {
            return Err(anyhow!("runtime.max_replicas must be at least 1"));
        }
        if self.service.scheme.trim().is_empty() {
            return Err(anyhow!("service.scheme cannot be empty"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the on-disk build-artifact repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Root directory holding per-tenant artifact trees.
    #[serde(default = "default_repository_root")]
    pub repository_root: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            repository_root: default_repository_root(),
        }
    }
}

fn default_repository_root() -> PathBuf {
    PathBuf::from("/var/lib/kdm/artifacts")
}

/// Location of persisted deployment state and the lifecycle event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding the state file and event log.
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: default_state_directory(),
        }
    }
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("/var/lib/kdm/state")
}

/// Settings used to derive service access endpoints for replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// URL scheme advertised for kernel services.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Host address replicas are reachable on.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// First port handed out by the endpoint allocator.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            base_port: default_base_port(),
        }
    }
}

fn default_scheme() -> String {
    "https".to_owned()
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

// Carbon-style kernels expose their management console on 9443.
fn default_base_port() -> u16 {
    9443
}

/// Replica supervision settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interval between replica heartbeat ticks.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        rename = "heartbeat_interval_ms",
        default = "default_heartbeat_interval"
    )]
    pub heartbeat_interval: Duration,
    /// Upper bound accepted by deploy/scale requests.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            max_replicas: default_max_replicas(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_replicas() -> u32 {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.service.base_port, 9443);
        assert_eq!(config.runtime.max_replicas, 32);
    }

    #[test]
    fn parses_partial_toml() {
        let config: AppConfig = r#"
            [artifacts]
            repository_root = "/tmp/kdm-artifacts"

            [runtime]
            heartbeat_interval_ms = 250
            max_replicas = 8
        "#
        .parse()
        .expect("partial config parses");
        assert_eq!(
            config.artifacts.repository_root,
            PathBuf::from("/tmp/kdm-artifacts")
        );
        assert_eq!(config.runtime.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.runtime.max_replicas, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.service.scheme, "https");
    }

    #[test]
    fn rejects_zero_max_replicas() {
        let result: Result<AppConfig> = r#"
            [runtime]
            max_replicas = 0
        "#
        .parse();
        assert!(result.is_err());
    }
}
