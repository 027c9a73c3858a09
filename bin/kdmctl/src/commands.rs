//! ---
//! kdm_section: "05-networking-external-interfaces"
//! kdm_subsection: "binary"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Subcommand dispatch for the KDM control CLI."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use kdm_common::config::{AppConfig, DEFAULT_CONFIG_CANDIDATES};
use kdm_common::{BuildVersion, TenantId};
use kdm_core::{KernelHandler, LocalKernelHandler};
use kdm_logging::{log_system_event, LogContext, SystemEventOutcome};
use kdm_store::FileStore;

const EVENT_LOG_FILE: &str = "lifecycle.jsonl";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a kernel build for a tenant.
    Deploy(DeployCommand),
    /// Replace a tenant's running build with a new version.
    #[command(name = "roll-update")]
    RollUpdate(RollUpdateCommand),
    /// Roll a tenant back to an earlier stored build.
    #[command(name = "roll-back")]
    RollBack(RollBackCommand),
    /// Change a tenant's replica count.
    Scale(ScaleCommand),
    /// Tear down a tenant's deployment.
    Remove(TenantOnlyCommand),
    /// Show the tenant's current replica count.
    Replicas(TenantOnlyCommand),
    /// Show the tenant's service access endpoints.
    Endpoints(TenantOnlyCommand),
    /// List stored build artifacts for a tenant under a base version.
    Artifacts(ArtifactsCommand),
}

#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Tenant owning the deployment.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Kernel archive or exploded distribution directory to import.
    #[arg(long = "kernel", value_name = "PATH")]
    kernel: PathBuf,
    /// Build version identifier for the artifact.
    #[arg(long = "build-version", value_name = "VERSION")]
    build_version: String,
    /// Number of replicas to start.
    #[arg(long, default_value_t = 1)]
    replicas: u32,
}

#[derive(Debug, Args)]
pub struct RollUpdateCommand {
    /// Tenant owning the deployment.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Kernel archive or exploded distribution directory to import.
    #[arg(long = "kernel", value_name = "PATH")]
    kernel: PathBuf,
    /// Build version to roll the tenant onto.
    #[arg(long = "build-version", value_name = "VERSION")]
    build_version: String,
}

#[derive(Debug, Args)]
pub struct RollBackCommand {
    /// Tenant owning the deployment.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Build version the tenant is currently running.
    #[arg(long = "running-version", value_name = "VERSION")]
    running_version: String,
    /// Earlier stored build version to roll back to.
    #[arg(long = "target-version", value_name = "VERSION")]
    target_version: String,
}

#[derive(Debug, Args)]
pub struct ScaleCommand {
    /// Tenant owning the deployment.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Desired replica count.
    #[arg(long, value_name = "COUNT")]
    replicas: u32,
}

#[derive(Debug, Args)]
pub struct TenantOnlyCommand {
    /// Tenant owning the deployment.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
}

#[derive(Debug, Args)]
pub struct ArtifactsCommand {
    /// Tenant owning the artifacts.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Base version scope (for example `4.4` lists every 4.4.x build).
    #[arg(long = "build-version", value_name = "VERSION")]
    build_version: String,
    /// Only list versions below the tenant's currently running build.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    lower: bool,
}

/// Dispatch entry point for all contract subcommands.
pub async fn run(command: Command, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = FileStore::open(&config.state.directory)
        .with_context(|| format!("unable to open state in {}", config.state.directory.display()))?;
    let handler = LocalKernelHandler::open(&config, Arc::new(store))
        .await?
        .with_event_log(&config.state.directory.join(EVENT_LOG_FILE))?;

    let outcome = execute(&handler, command).await;
    handler.shutdown().await;
    outcome
}

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        return contents.parse();
    }
    if DEFAULT_CONFIG_CANDIDATES
        .iter()
        .any(|candidate| Path::new(candidate).exists())
        || std::env::var(AppConfig::ENV_CONFIG_PATH).is_ok()
    {
        return AppConfig::load(DEFAULT_CONFIG_CANDIDATES);
    }
    Ok(AppConfig::default())
}

async fn execute(handler: &LocalKernelHandler, command: Command) -> Result<()> {
    match command {
        Command::Deploy(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let version = BuildVersion::new(&cmd.build_version);
            let context = LogContext::new()
                .with_tenant(&cmd.tenant)
                .with_build(&cmd.build_version);
            match handler
                .deploy(&tenant, &cmd.kernel, &version, cmd.replicas)
                .await
            {
                Ok(true) => {
                    log_system_event(
                        Some(&context),
                        "deployment.deploy",
                        "kernel deployed",
                        SystemEventOutcome::Success,
                    );
                    println!(
                        "deployed {} build {} with {} replica(s)",
                        tenant, version, cmd.replicas
                    );
                    Ok(())
                }
                Ok(false) => {
                    println!("tenant {tenant} already has an active deployment; nothing changed");
                    Ok(())
                }
                Err(err) => fault(&context, "deployment.deploy", err),
            }
        }
        Command::RollUpdate(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let version = BuildVersion::new(&cmd.build_version);
            let context = LogContext::new()
                .with_tenant(&cmd.tenant)
                .with_build(&cmd.build_version);
            match handler.roll_update(&tenant, &cmd.kernel, &version).await {
                Ok(true) => {
                    log_system_event(
                        Some(&context),
                        "deployment.roll_update",
                        "rolling update complete",
                        SystemEventOutcome::Success,
                    );
                    println!("tenant {tenant} rolled onto build {version}");
                    Ok(())
                }
                Ok(false) => {
                    println!("tenant {tenant} already runs build {version}; nothing changed");
                    Ok(())
                }
                Err(err) => fault(&context, "deployment.roll_update", err),
            }
        }
        Command::RollBack(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let running = BuildVersion::new(&cmd.running_version);
            let target = BuildVersion::new(&cmd.target_version);
            let context = LogContext::new()
                .with_tenant(&cmd.tenant)
                .with_build(&cmd.target_version);
            match handler.roll_back(&tenant, &running, &target).await {
                Ok(_) => {
                    log_system_event(
                        Some(&context),
                        "deployment.roll_back",
                        "rollback complete",
                        SystemEventOutcome::Success,
                    );
                    println!("tenant {tenant} rolled back to build {target}");
                    Ok(())
                }
                Err(err) => fault(&context, "deployment.roll_back", err),
            }
        }
        Command::Scale(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let context = LogContext::new().with_tenant(&cmd.tenant);
            match handler.scale(&tenant, cmd.replicas).await {
                Ok(true) => {
                    log_system_event(
                        Some(&context),
                        "deployment.scale",
                        "replica count changed",
                        SystemEventOutcome::Success,
                    );
                    println!("tenant {tenant} scaled to {} replica(s)", cmd.replicas);
                    Ok(())
                }
                Ok(false) => {
                    println!(
                        "tenant {tenant} already runs {} replica(s); nothing changed",
                        cmd.replicas
                    );
                    Ok(())
                }
                Err(err) => fault(&context, "deployment.scale", err),
            }
        }
        Command::Remove(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let context = LogContext::new().with_tenant(&cmd.tenant);
            match handler.remove(&tenant).await {
                Ok(_) => {
                    log_system_event(
                        Some(&context),
                        "deployment.remove",
                        "deployment removed",
                        SystemEventOutcome::Success,
                    );
                    println!("tenant {tenant} deployment removed");
                    Ok(())
                }
                Err(err) => fault(&context, "deployment.remove", err),
            }
        }
        Command::Replicas(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let count = handler.replica_count(&tenant).await?;
            println!("{count}");
            Ok(())
        }
        Command::Endpoints(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let message = handler.service_access_ips(&tenant).await?;
            println!("{message}");
            Ok(())
        }
        Command::Artifacts(cmd) => {
            let tenant = TenantId::new(&cmd.tenant);
            let base = BuildVersion::new(&cmd.build_version);
            let versions = if cmd.lower {
                handler
                    .list_lower_build_artifact_versions(&tenant, &base)
                    .await?
            } else {
                handler.list_existing_build_artifacts(&tenant, &base).await?
            };
            if versions.is_empty() {
                println!("no matching build artifacts for tenant {tenant}");
            }
            for version in versions {
                println!("{version}");
            }
            Ok(())
        }
    }
}

fn fault(context: &LogContext<'_>, event: &str, err: kdm_core::HandlerError) -> Result<()> {
    log_system_event(
        Some(context),
        event,
        &err.to_string(),
        SystemEventOutcome::Fault,
    );
    Err(err.into())
}
