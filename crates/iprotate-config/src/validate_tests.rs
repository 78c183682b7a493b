use super::*;
use std::path::PathBuf;

#[test]
fn test_default_config_is_valid() {
    validate_config(&FleetConfig::default()).unwrap();
}

#[test]
fn test_zero_check_interval_rejected() {
    let mut config = FleetConfig::default();
    config.monitor.check_interval_secs = 0;
    let err = validate_config(&config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "monitor.check_interval_secs must be > 0 (got 0)"
    );
}

#[test]
fn test_empty_install_command_rejected() {
    let mut config = FleetConfig::default();
    config.provision.install_command = "   ".to_string();
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("install_command"));
}

#[test]
fn test_zero_install_timeout_rejected() {
    let mut config = FleetConfig::default();
    config.provision.install_timeout_secs = 0;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("provision.install_timeout_secs"));
}

#[test]
fn test_zero_poll_interval_rejected() {
    let mut config = FleetConfig::default();
    config.polling.single_ready_interval_secs = 0;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("polling.single_ready_interval_secs"));
}

#[test]
fn test_multiplier_below_one_rejected() {
    let mut config = FleetConfig::default();
    config.polling.multiplier = 0.5;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("polling.multiplier"));

    config.polling.multiplier = f64::NAN;
    assert!(validate_config(&config).is_err());
}

#[test]
fn test_jitter_out_of_range_rejected() {
    let mut config = FleetConfig::default();
    config.polling.jitter = 1.5;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("polling.jitter"));
}

#[test]
fn test_empty_restart_command_rejected() {
    let mut config = FleetConfig::default();
    config.router.restart_command.clear();
    let err = validate_config(&config).unwrap_err();
    assert_eq!(err.to_string(), "router.restart_command cannot be empty");
}

#[test]
fn test_port_floor_overflow_rejected() {
    let mut config = FleetConfig::default();
    config.router.default_port_floor = 65000;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("leaves no room"));

    config.router.default_port_floor = 64535;
    validate_config(&config).unwrap();
}

#[test]
fn test_empty_paths_rejected() {
    let mut config = FleetConfig::default();
    config.paths.accounts_file = PathBuf::new();
    let err = validate_config(&config).unwrap_err();
    assert_eq!(err.to_string(), "paths.accounts_file cannot be empty");
}

#[test]
fn test_empty_region_rejected() {
    let mut config = FleetConfig::default();
    config.cloud.region = String::new();
    let err = validate_config(&config).unwrap_err();
    assert_eq!(err.to_string(), "cloud.region cannot be empty");
}
