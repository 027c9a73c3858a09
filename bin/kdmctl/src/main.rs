//! ---
//! kdm_section: "05-networking-external-interfaces"
//! kdm_subsection: "binary"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Control CLI for administrators driving tenant kernel deployments."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use kdm_common::version::VersionInfo;
use kdm_logging as logging;

mod commands;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "KDM administrative control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    /// Configuration file (defaults to /etc/kdm/config.toml, then ./kdm.toml).
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<commands::Command>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    match cli.command {
        Some(command) => commands::run(command, cli.config.as_deref()).await,
        None => {
            println!("{}", VersionInfo::current().cli_string());
            println!("run `kdmctl --help` for available commands");
            Ok(())
        }
    }
}
