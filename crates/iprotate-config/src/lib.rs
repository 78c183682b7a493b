//! Fleet configuration loading and validation (`~/.config/cloud-iprotate/config.toml`).

pub mod config;
pub mod paths;
pub mod validate;

pub use config::{
    ApiSection, CloudConfig, FleetConfig, MonitorConfig, PathsConfig, PollingConfig,
    ProvisionConfig, RouterConfig,
};
pub use validate::validate_config;
