use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Offset between a section's SOCKS5 port and its HTTP port.
pub const HTTP_PORT_OFFSET: u16 = 1000;

/// Output format for listing commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Lifecycle status of an account record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Healthy spare, eligible as a failover backup.
    Available,
    /// Currently hosting fleet instances.
    Active,
    /// Credentials rejected or quota gone. Never selected again automatically.
    Suspended,
    /// Provisioning failed during bootstrap; needs operator attention.
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Error => "error",
        }
    }

    /// Whether the transition table allows moving from `self` to `to`.
    ///
    /// | from              | to          | trigger                                  |
    /// |-------------------|-------------|------------------------------------------|
    /// | active            | suspended   | health probe fails / quota is zero       |
    /// | available         | suspended   | quota is zero / backup credentials fail  |
    /// | available         | active      | provisioning succeeds                    |
    /// | active, available | error       | bootstrap provisioning fails             |
    /// | active            | active      | bootstrap re-provisions the account      |
    /// | suspended         | suspended   | failover clears the old instances        |
    pub fn can_transition_to(self, to: AccountStatus) -> bool {
        use AccountStatus::*;
        matches!(
            (self, to),
            (Active, Suspended)
                | (Available, Suspended)
                | (Available, Active)
                | (Active, Error)
                | (Available, Error)
                | (Active, Active)
                | (Suspended, Suspended)
        )
    }

    /// Accounts the bootstrap pass is allowed to provision.
    pub fn is_deployable(&self) -> bool {
        matches!(self, Self::Active | Self::Available)
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cloud account as stored in the accounts file.
///
/// Field names are a stable contract with the on-disk JSON. Unknown fields
/// added by operators survive a load/save cycle through `extra`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub used_for_instances: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AccountRecord {
    pub fn new(
        id: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        status: AccountStatus,
    ) -> Self {
        Self {
            id: id.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            status,
            used_for_instances: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("id", &self.id)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("status", &self.status)
            .field("used_for_instances", &self.used_for_instances)
            .finish()
    }
}

/// An instance that finished installation and can be exposed by the router.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>, account: &AccountRecord) -> Self {
        Self {
            instance_id: instance_id.into(),
            account_id: account.id.clone(),
            access_key: account.access_key.clone(),
            secret_key: account.secret_key.clone(),
        }
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("instance_id", &self.instance_id)
            .field("account_id", &self.account_id)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// One proxy endpoint in the router configuration, keyed by `port`.
#[derive(Clone, PartialEq, Eq)]
pub struct RouterSection {
    pub port: u16,
    pub socks5_port: u16,
    pub http_port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub instance_id: String,
    pub region: String,
}

impl RouterSection {
    /// Build the section exposing `instance` on `port`.
    ///
    /// Returns `None` when `port + HTTP_PORT_OFFSET` does not fit in a port.
    pub fn for_instance(port: u16, instance: &InstanceRecord, region: &str) -> Option<Self> {
        Some(Self {
            port,
            socks5_port: port,
            http_port: http_port_for(port)?,
            access_key: instance.access_key.clone(),
            secret_key: instance.secret_key.clone(),
            instance_id: instance.instance_id.clone(),
            region: region.to_string(),
        })
    }
}

impl std::fmt::Debug for RouterSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSection")
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("access_key", &self.access_key)
            .field("instance_id", &self.instance_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// HTTP port paired with a SOCKS5 port.
pub fn http_port_for(socks5_port: u16) -> Option<u16> {
    socks5_port.checked_add(HTTP_PORT_OFFSET)
}
