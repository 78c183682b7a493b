use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod accounts_cmd;
mod cli;
mod config_cmds;
mod doctor;
mod fleet_cmds;
mod logging;

use cli::{AccountsCommands, Cli, Commands, ConfigCommands};

/// Initialize tracing: stderr always, plus a plain-text file when `log_dir`
/// is given. The returned guard must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = logging::create_log_writer(dir)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .ok();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Monitor { log_dir, .. } => log_dir.as_deref(),
        _ => None,
    };
    let _log_guard = init_tracing(log_dir)?;

    let config = cli.config;
    let exit_code = match cli.command {
        Commands::Bootstrap => fleet_cmds::handle_bootstrap(config).await?,
        Commands::Monitor { once, .. } => fleet_cmds::handle_monitor(config, once).await?,
        Commands::Failover {
            old_access_key,
            new_account_id,
        } => fleet_cmds::handle_failover(config, old_access_key, new_account_id).await?,
        Commands::Accounts { cmd } => match cmd {
            AccountsCommands::List { format } => {
                accounts_cmd::handle_accounts_list(config, format)?;
                fleet_cmds::EXIT_OK
            }
        },
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Init { force } => {
                config_cmds::handle_config_init(config, force)?;
                fleet_cmds::EXIT_OK
            }
            ConfigCommands::Show { format } => {
                config_cmds::handle_config_show(config, format)?;
                fleet_cmds::EXIT_OK
            }
        },
        Commands::Doctor => doctor::run_doctor(config)?,
    };

    if exit_code != fleet_cmds::EXIT_OK {
        // Flush the file log before exiting without unwinding.
        drop(_log_guard);
        std::process::exit(exit_code);
    }
    Ok(())
}
