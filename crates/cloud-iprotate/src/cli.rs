use clap::{Parser, Subcommand};
use iprotate_core::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "iprotate",
    version,
    about = "Cloud IP rotation: provision proxy instances across accounts and fail over when one dies"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/cloud-iprotate/config.toml, or IPROTATE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision every active/available account, then sync the router once
    Bootstrap,

    /// Probe active accounts and fail over unhealthy ones
    Monitor {
        /// Run a single health cycle and exit
        #[arg(long)]
        once: bool,

        /// Also write logs to run-<timestamp>.log in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Move every router section of an access key onto a backup account
    Failover {
        /// Access key whose router sections should be replaced
        #[arg(long)]
        old_access_key: String,

        /// Account id of the available backup
        #[arg(long)]
        new_account_id: String,
    },

    /// Inspect the account registry
    Accounts {
        #[command(subcommand)]
        cmd: AccountsCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },

    /// Check the local environment (aws CLI, config, account store, router file)
    Doctor,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// List accounts with status and instance count
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write the default config template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}
