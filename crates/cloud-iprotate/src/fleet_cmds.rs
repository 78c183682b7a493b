//! Commands that touch the cloud: bootstrap, monitor and failover.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iprotate_cloud::AwsCliConnector;
use iprotate_config::{FleetConfig, validate_config};
use iprotate_registry::{AccountStore, RegistryHandle};
use iprotate_scheduler::{
    AccountOutcome, BootstrapReport, CycleReport, FailoverController, FailoverReport,
    FleetContext, HealthMonitor, run_bootstrap,
};

/// Process exit codes shared by the fleet commands.
pub(crate) const EXIT_OK: i32 = 0;
pub(crate) const EXIT_FAILURE: i32 = 1;
pub(crate) const EXIT_PARTIAL: i32 = 2;

/// Load and validate config, open the account store and wire the AWS adapter.
fn build_context(config_path: Option<PathBuf>) -> Result<FleetContext> {
    let config = FleetConfig::load(config_path)?;
    validate_config(&config)?;

    let store = AccountStore::new(&config.paths.accounts_file);
    let accounts = store.try_load().with_context(|| {
        format!(
            "Failed to load account store: {}",
            config.paths.accounts_file.display()
        )
    })?;
    info!(
        path = %config.paths.accounts_file.display(),
        accounts = accounts.len(),
        "account registry loaded"
    );
    let registry = RegistryHandle::spawn_with(store, accounts);
    let connector = Arc::new(AwsCliConnector::new(
        &config.cloud.aws_cli,
        &config.cloud.region,
    ));

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());
    Ok(FleetContext::new(config, connector, registry, cancel))
}

/// Cancel `token` on the first Ctrl-C.
fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight work");
            token.cancel();
        }
    });
}

pub(crate) async fn handle_bootstrap(config_path: Option<PathBuf>) -> Result<i32> {
    let ctx = build_context(config_path)?;
    let report = run_bootstrap(&ctx)
        .await
        .context("bootstrap could not update the router config")?;
    print_bootstrap(&report);
    Ok(bootstrap_exit_code(&report))
}

pub(crate) async fn handle_monitor(config_path: Option<PathBuf>, once: bool) -> Result<i32> {
    let ctx = build_context(config_path)?;
    let monitor = HealthMonitor::new(ctx);
    if once {
        let report = monitor.run_cycle().await;
        print_cycle(&report);
        return Ok(cycle_exit_code(&report));
    }
    monitor.run().await;
    Ok(EXIT_OK)
}

pub(crate) async fn handle_failover(
    config_path: Option<PathBuf>,
    old_access_key: String,
    new_account_id: String,
) -> Result<i32> {
    let ctx = build_context(config_path)?;
    let report = FailoverController::new(ctx)
        .failover(&old_access_key, &new_account_id)
        .await
        .with_context(|| format!("failover of {old_access_key} to {new_account_id} failed"))?;
    print_failover(&report);
    Ok(failover_exit_code(&report))
}

fn print_bootstrap(report: &BootstrapReport) {
    for (id, outcome) in &report.outcomes {
        match outcome {
            AccountOutcome::Deployed(instances) => {
                println!("{id}: deployed {} instance(s)", instances.len())
            }
            AccountOutcome::Suspended => println!("{id}: suspended"),
            AccountOutcome::Skipped => println!("{id}: skipped"),
            AccountOutcome::Failed(err) => println!("{id}: failed ({err})"),
        }
    }
    if !report.ports.is_empty() {
        let ports: Vec<String> = report.ports.iter().map(u16::to_string).collect();
        println!("router sections added: {}", ports.join(", "));
    }
}

fn print_cycle(report: &CycleReport) {
    println!(
        "probed {}, healthy {}, suspended {}",
        report.probed,
        report.healthy,
        report.suspended.len()
    );
    for id in &report.replaced {
        println!("{id}: replaced by backup");
    }
    for id in &report.unresolved {
        println!("{id}: no working replacement");
    }
}

fn print_failover(report: &FailoverReport) {
    for replacement in &report.replaced {
        println!(
            "[{}] {} -> {}",
            replacement.port,
            replacement.old_instance.as_deref().unwrap_or("-"),
            replacement.new_instance
        );
    }
    for port in &report.failed {
        println!("[{port}] replacement failed, section left unchanged");
    }
    if report.replaced.is_empty() && report.failed.is_empty() {
        println!("no router sections used the old access key");
    }
}

fn bootstrap_exit_code(report: &BootstrapReport) -> i32 {
    match (report.deployed_accounts(), report.failed_accounts()) {
        (_, 0) => EXIT_OK,
        (0, _) => EXIT_FAILURE,
        _ => EXIT_PARTIAL,
    }
}

fn failover_exit_code(report: &FailoverReport) -> i32 {
    if report.is_failure() {
        EXIT_FAILURE
    } else if report.is_partial() {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    }
}

fn cycle_exit_code(report: &CycleReport) -> i32 {
    if report.unresolved.is_empty() {
        EXIT_OK
    } else {
        EXIT_PARTIAL
    }
}
