//! Provider-neutral ports used by the scheduler.
//!
//! One [`CloudApi`] is bound to one account's credentials; a
//! [`CloudConnector`] builds them on demand.

use std::sync::Arc;

use async_trait::async_trait;
use iprotate_core::AccountRecord;

use crate::error::CloudError;

/// Managed policy granting the command agent its permissions.
pub const COMMAND_AGENT_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

/// Trust policy letting compute instances assume a role.
pub const INSTANCE_TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// States an instance can be in before it is gone for good.
    pub const LIVE: [InstanceState; 5] = [
        Self::Pending,
        Self::Running,
        Self::ShuttingDown,
        Self::Stopping,
        Self::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub state: InstanceState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFilter {
    pub owner: String,
    pub name_pattern: String,
    pub architecture: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSummary {
    pub image_id: String,
    pub name: String,
    /// ISO-8601 timestamp; lexical order is chronological.
    pub creation_date: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub count: u32,
    pub instance_profile: Option<String>,
    pub security_group_id: Option<String>,
    pub tags: Vec<(String, String)>,
}

/// Registration of an instance with the managed-command service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRegistration {
    pub instance_id: String,
    pub ping_status: String,
}

impl CommandRegistration {
    pub fn is_online(&self) -> bool {
        self.ping_status == "Online"
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Instances(Vec<String>),
    Tag { key: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelled,
    TimedOut,
    Failed,
    Cancelling,
    Other(String),
}

impl CommandStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Delayed" => Self::Delayed,
            "Success" => Self::Success,
            "Cancelled" => Self::Cancelled,
            "TimedOut" => Self::TimedOut,
            "Failed" => Self::Failed,
            "Cancelling" => Self::Cancelling,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::TimedOut)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(raw) => f.write_str(raw),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Cloud operations needed by the provisioning and health flows, bound to one
/// account.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Cheapest authenticated call; fails when the credentials are rejected.
    async fn probe_credentials(&self) -> Result<(), CloudError>;

    async fn list_instances(
        &self,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, CloudError>;
    async fn instance_states(&self, ids: &[String]) -> Result<Vec<InstanceSummary>, CloudError>;
    async fn terminate_instances(&self, ids: &[String]) -> Result<(), CloudError>;

    /// Default vCPU count of an instance shape.
    async fn instance_vcpus(&self, instance_type: &str) -> Result<u32, CloudError>;
    async fn vcpu_quota(&self, service: &str, quota_code: &str) -> Result<f64, CloudError>;

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<(), CloudError>;
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), CloudError>;
    async fn create_instance_profile(&self, name: &str) -> Result<(), CloudError>;
    async fn add_role_to_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> Result<(), CloudError>;

    async fn default_vpc_id(&self) -> Result<Option<String>, CloudError>;
    async fn find_security_group(
        &self,
        vpc_id: &str,
        name: &str,
    ) -> Result<Option<String>, CloudError>;
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, CloudError>;
    /// Open the group to all protocols from anywhere.
    async fn authorize_all_ingress(&self, group_id: &str) -> Result<(), CloudError>;

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, CloudError>;
    /// Returns the ids of the launched instances.
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>, CloudError>;

    async fn command_registrations(
        &self,
        ids: &[String],
    ) -> Result<Vec<CommandRegistration>, CloudError>;
    /// Returns the command id.
    async fn send_command(
        &self,
        target: &CommandTarget,
        command: &str,
        timeout_secs: u64,
    ) -> Result<String, CloudError>;
    async fn command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<Invocation, CloudError>;
}

/// Builds a [`CloudApi`] bound to an account's credentials.
pub trait CloudConnector: Send + Sync {
    fn connect(&self, account: &AccountRecord) -> Arc<dyn CloudApi>;
}
