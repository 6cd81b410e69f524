use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod backups;
pub mod check;
pub mod init;
pub mod run;
pub mod status;
pub mod update;

#[derive(Parser)]
#[command(name = "refit", version, about = "Unattended updates for Docker Compose deployments")]
pub struct Cli {
    /// Path to refit.toml
    #[arg(short, long, default_value = "refit.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold refit.toml in the current directory
    Init,

    /// Check configured packages for newer tags without applying anything
    Check {
        /// Limit the check to one package
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Update one package now
    Update {
        /// Package name
        package: String,
        /// Target version tag (defaults to the newest; older tags downgrade)
        #[arg(long)]
        version: Option<String>,
    },

    /// Watch all packages and apply updates as tags appear
    Run,

    /// Show deployed versions and migration state per package
    Status,

    /// List backup archives for a package, newest first
    Backups {
        /// Package name
        package: String,
    },
}
