//! Environment diagnostics for iprotate.

use anyhow::Result;
use std::path::PathBuf;

use iprotate_config::paths::resolve_config_path;
use iprotate_config::{FleetConfig, validate_config};
use iprotate_core::AccountStatus;
use iprotate_registry::AccountStore;
use iprotate_router::RouterSync;

/// Outcome of one diagnostic line.
#[derive(Debug, PartialEq, Eq)]
enum Check {
    Ok(String),
    Warn(String),
    Fail(String),
}

impl Check {
    fn print(&self, label: &str) {
        match self {
            Self::Ok(msg) => println!("  [ok]   {label}: {msg}"),
            Self::Warn(msg) => println!("  [warn] {label}: {msg}"),
            Self::Fail(msg) => println!("  [FAIL] {label}: {msg}"),
        }
    }
}

/// Run all checks. Returns exit code 1 if any check failed.
pub(crate) fn run_doctor(config_path: Option<PathBuf>) -> Result<i32> {
    println!("=== iprotate Environment Check ===");
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    match resolve_config_path(config_path.clone()) {
        Some(path) => println!("Config:      {}", path.display()),
        None => println!("Config:      (unable to determine, using defaults)"),
    }
    println!();

    let config = match FleetConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            Check::Fail(format!("{e:#}")).print("config");
            return Ok(1);
        }
    };

    let checks = [
        ("config", check_config(&config)),
        ("aws cli", check_aws_cli(&config.cloud.aws_cli)),
        ("accounts", check_accounts(&config)),
        ("router", check_router(&config)),
    ];
    for (label, check) in &checks {
        check.print(label);
    }

    let failed = checks.iter().any(|(_, c)| matches!(c, Check::Fail(_)));
    Ok(if failed { 1 } else { 0 })
}

fn check_config(config: &FleetConfig) -> Check {
    match validate_config(config) {
        Ok(()) => Check::Ok("valid".to_string()),
        Err(e) => Check::Fail(format!("{e:#}")),
    }
}

fn check_aws_cli(cli: &str) -> Check {
    match which::which(cli) {
        Ok(path) => Check::Ok(path.display().to_string()),
        Err(_) => Check::Fail(format!("'{cli}' not found in PATH")),
    }
}

fn check_accounts(config: &FleetConfig) -> Check {
    let store = AccountStore::new(&config.paths.accounts_file);
    if !store.path().exists() {
        return Check::Fail(format!("{} does not exist", store.path().display()));
    }
    match store.try_load() {
        Ok(accounts) => {
            let count = |status: AccountStatus| accounts.iter().filter(|a| a.status == status).count();
            let summary = format!(
                "{} account(s): {} active, {} available, {} suspended, {} error",
                accounts.len(),
                count(AccountStatus::Active),
                count(AccountStatus::Available),
                count(AccountStatus::Suspended),
                count(AccountStatus::Error),
            );
            if count(AccountStatus::Available) == 0 {
                Check::Warn(format!("{summary} (no backup for failover)"))
            } else {
                Check::Ok(summary)
            }
        }
        Err(e) => Check::Fail(format!("{e:#}")),
    }
}

fn check_router(config: &FleetConfig) -> Check {
    let sync = RouterSync::new(
        &config.paths.router_config,
        &config.router,
        &config.cloud.region,
    );
    match sync.load() {
        Ok(Some(doc)) => Check::Ok(format!(
            "{} endpoint section(s) in {}",
            doc.numeric_ports().len(),
            sync.path().display()
        )),
        Ok(None) => Check::Warn(format!(
            "{} does not exist yet (created by bootstrap)",
            sync.path().display()
        )),
        Err(e) => Check::Fail(e.to_string()),
    }
}
