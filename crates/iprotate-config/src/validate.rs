use anyhow::{Result, bail};

use crate::config::FleetConfig;
use iprotate_core::types::http_port_for;

/// Validate a loaded fleet configuration.
/// Returns Ok(()) if valid, or Err with a descriptive message.
pub fn validate_config(config: &FleetConfig) -> Result<()> {
    validate_paths(config)?;
    validate_cloud(config)?;
    validate_provision(config)?;
    validate_polling(config)?;
    validate_monitor(config)?;
    validate_router(config)?;
    Ok(())
}

fn validate_paths(config: &FleetConfig) -> Result<()> {
    if config.paths.accounts_file.as_os_str().is_empty() {
        bail!("paths.accounts_file cannot be empty");
    }
    if config.paths.router_config.as_os_str().is_empty() {
        bail!("paths.router_config cannot be empty");
    }
    Ok(())
}

fn validate_cloud(config: &FleetConfig) -> Result<()> {
    let cloud = &config.cloud;
    for (key, value) in [
        ("cloud.region", &cloud.region),
        ("cloud.instance_type", &cloud.instance_type),
        ("cloud.vcpu_quota_code", &cloud.vcpu_quota_code),
        ("cloud.aws_cli", &cloud.aws_cli),
    ] {
        if value.trim().is_empty() {
            bail!("{key} cannot be empty");
        }
    }
    Ok(())
}

fn validate_provision(config: &FleetConfig) -> Result<()> {
    let provision = &config.provision;
    if provision.install_command.trim().is_empty() {
        bail!("provision.install_command cannot be empty");
    }
    for (key, value) in [
        ("provision.install_timeout_secs", provision.install_timeout_secs),
        ("provision.launch_timeout_secs", provision.launch_timeout_secs),
        ("provision.terminate_timeout_secs", provision.terminate_timeout_secs),
        ("provision.batch_ready_timeout_secs", provision.batch_ready_timeout_secs),
        ("provision.batch_install_wait_secs", provision.batch_install_wait_secs),
        ("provision.single_ready_timeout_secs", provision.single_ready_timeout_secs),
        ("provision.single_install_wait_secs", provision.single_install_wait_secs),
        ("provision.quota_poll_timeout_secs", provision.quota_poll_timeout_secs),
    ] {
        if value == 0 {
            bail!("{key} must be > 0 (got 0)");
        }
    }
    Ok(())
}

fn validate_polling(config: &FleetConfig) -> Result<()> {
    let polling = &config.polling;
    for (key, value) in [
        ("polling.state_interval_secs", polling.state_interval_secs),
        ("polling.batch_ready_interval_secs", polling.batch_ready_interval_secs),
        ("polling.single_ready_interval_secs", polling.single_ready_interval_secs),
        ("polling.batch_install_interval_secs", polling.batch_install_interval_secs),
        ("polling.single_install_interval_secs", polling.single_install_interval_secs),
        ("polling.max_interval_secs", polling.max_interval_secs),
        ("provision.quota_poll_interval_secs", config.provision.quota_poll_interval_secs),
    ] {
        if value == 0 {
            bail!("{key} must be > 0 (got 0)");
        }
    }
    if polling.multiplier.is_nan() || polling.multiplier < 1.0 {
        bail!(
            "polling.multiplier must be >= 1.0 (got {})",
            polling.multiplier
        );
    }
    if !(0.0..=1.0).contains(&polling.jitter) {
        bail!(
            "polling.jitter must be between 0.0 and 1.0 (got {})",
            polling.jitter
        );
    }
    Ok(())
}

fn validate_monitor(config: &FleetConfig) -> Result<()> {
    if config.monitor.check_interval_secs == 0 {
        bail!("monitor.check_interval_secs must be > 0 (got 0)");
    }
    Ok(())
}

fn validate_router(config: &FleetConfig) -> Result<()> {
    let router = &config.router;
    if router.restart_command.is_empty() || router.restart_command[0].trim().is_empty() {
        bail!("router.restart_command cannot be empty");
    }
    if router.default_port_floor == 0 {
        bail!("router.default_port_floor must be > 0 (got 0)");
    }
    // The floor is the first port handed out on an empty router config.
    if http_port_for(router.default_port_floor).is_none() {
        bail!(
            "router.default_port_floor ({}) leaves no room for HTTP ports",
            router.default_port_floor
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
