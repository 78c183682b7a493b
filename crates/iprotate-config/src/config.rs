//! Fleet configuration.
//!
//! Every field has a default matching the historical deployment layout under
//! `/opt/cloud-iprotate`, so a missing config file yields a working setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

pub const DEFAULT_INSTALL_COMMAND: &str = "sleep 10 && sudo curl -sSL https://raw.githubusercontent.com/harlock7771/cloud-iprotate/main/install-service.sh | sudo bash -s";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON account store.
    pub accounts_file: PathBuf,
    /// Router configuration file rewritten after provisioning.
    pub router_config: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            accounts_file: PathBuf::from("/opt/cloud-iprotate/aws_accounts.json"),
            router_config: PathBuf::from("/opt/cloud-iprotate/config.conf"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub region: String,
    /// Instance shape launched for every proxy endpoint.
    pub instance_type: String,
    /// Oversized shape used to nudge the provider into raising a new account's quota.
    pub quota_trigger_instance_type: String,
    pub vcpu_quota_service: String,
    pub vcpu_quota_code: String,
    /// Quota value (vCPU) providers hand out to unverified accounts.
    pub low_quota_ceiling: u32,
    /// `aws` CLI executable.
    pub aws_cli: String,
    pub image_owner: String,
    pub image_name_pattern: String,
    pub image_architecture: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            instance_type: "t2.micro".to_string(),
            quota_trigger_instance_type: "c5.4xlarge".to_string(),
            vcpu_quota_service: "ec2".to_string(),
            vcpu_quota_code: "L-1216C47A".to_string(),
            low_quota_ceiling: 5,
            aws_cli: "aws".to_string(),
            image_owner: "amazon".to_string(),
            image_name_pattern: "al2023-ami-2023.*-kernel-6.1-x86_64".to_string(),
            image_architecture: "x86_64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub install_command: String,
    /// Execution timeout handed to the managed-command channel.
    pub install_timeout_secs: u64,
    pub role_propagation_secs: u64,
    pub profile_propagation_secs: u64,
    pub launch_timeout_secs: u64,
    pub terminate_timeout_secs: u64,
    /// Readiness/install deadlines for the bootstrap (tag group) path.
    pub batch_ready_timeout_secs: u64,
    pub batch_install_wait_secs: u64,
    /// Readiness/install deadlines for the failover (single instance) path.
    pub single_ready_timeout_secs: u64,
    pub single_install_wait_secs: u64,
    pub quota_poll_interval_secs: u64,
    pub quota_poll_timeout_secs: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            install_command: DEFAULT_INSTALL_COMMAND.to_string(),
            install_timeout_secs: 600,
            role_propagation_secs: 10,
            profile_propagation_secs: 15,
            launch_timeout_secs: 600,
            terminate_timeout_secs: 600,
            batch_ready_timeout_secs: 600,
            batch_install_wait_secs: 900,
            single_ready_timeout_secs: 300,
            single_install_wait_secs: 600,
            quota_poll_interval_secs: 60,
            quota_poll_timeout_secs: 300,
        }
    }
}

impl ProvisionConfig {
    pub fn role_propagation(&self) -> Duration {
        Duration::from_secs(self.role_propagation_secs)
    }

    pub fn profile_propagation(&self) -> Duration {
        Duration::from_secs(self.profile_propagation_secs)
    }
}

/// Backoff used by every wait loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval of the first retry while waiting for instance state changes.
    pub state_interval_secs: u64,
    /// Readiness poll interval for the bootstrap path.
    pub batch_ready_interval_secs: u64,
    pub single_ready_interval_secs: u64,
    pub batch_install_interval_secs: u64,
    pub single_install_interval_secs: u64,
    /// Growth factor applied after each unsuccessful poll.
    pub multiplier: f64,
    /// Upper bound for a single sleep.
    pub max_interval_secs: u64,
    /// Random fraction (0..=1) added to or removed from each sleep.
    pub jitter: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            state_interval_secs: 15,
            batch_ready_interval_secs: 30,
            single_ready_interval_secs: 20,
            batch_install_interval_secs: 30,
            single_install_interval_secs: 15,
            multiplier: 1.5,
            max_interval_secs: 60,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 600,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// First port handed out when the router config has no numeric sections.
    pub default_port_floor: u16,
    /// Command (argv) that makes the router reload its configuration.
    pub restart_command: Vec<String>,
    /// Reserved listener section written on first bootstrap.
    pub api: ApiSection,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_port_floor: 2000,
            restart_command: ["pm2", "restart", "index.js", "--name", "iprotate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api: ApiSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    #[serde(rename = "type")]
    pub kind: String,
    pub prefix: String,
    pub port: String,
    #[serde(rename = "hostLocalIp")]
    pub host_local_ip: String,
    #[serde(rename = "hostPublicIp")]
    pub host_public_ip: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            kind: "api".to_string(),
            prefix: "tj1".to_string(),
            port: "3000".to_string(),
            host_local_ip: "0.0.0.0".to_string(),
            host_public_ip: "ip vps ini".to_string(),
        }
    }
}

impl ApiSection {
    /// Key/value pairs in the order the router expects them.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("type", &self.kind),
            ("prefix", &self.prefix),
            ("port", &self.port),
            ("hostLocalIp", &self.host_local_ip),
            ("hostPublicIp", &self.host_public_ip),
        ]
    }
}

impl FleetConfig {
    /// Load config from the resolved path.
    ///
    /// Returns `Default` if the file does not exist or the config directory
    /// cannot be determined.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        match paths::resolve_config_path(explicit) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Generate default config TOML with comments as a template.
    pub fn default_template() -> String {
        format!(
            r#"# cloud-iprotate configuration
# Location: ~/.config/cloud-iprotate/config.toml (override with --config or IPROTATE_CONFIG)

[paths]
accounts_file = "/opt/cloud-iprotate/aws_accounts.json"
router_config = "/opt/cloud-iprotate/config.conf"

[cloud]
region = "us-east-1"
instance_type = "t2.micro"
quota_trigger_instance_type = "c5.4xlarge"
low_quota_ceiling = 5
aws_cli = "aws"

[provision]
install_command = "{DEFAULT_INSTALL_COMMAND}"
role_propagation_secs = 10
profile_propagation_secs = 15

[polling]
multiplier = 1.5
jitter = 0.1

[monitor]
check_interval_secs = 600

[router]
default_port_floor = 2000
restart_command = ["pm2", "restart", "index.js", "--name", "iprotate"]

[router.api]
type = "api"
prefix = "tj1"
port = "3000"
hostLocalIp = "0.0.0.0"
hostPublicIp = "ip vps ini"
"#
        )
    }

    /// Write the default template to `path`, creating directories as needed.
    pub fn save_default_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(path, Self::default_template())
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
