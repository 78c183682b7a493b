use crate::types::AccountStatus;

/// Step of the provisioning pipeline, used to tag failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStep {
    Cleanup,
    Prerequisites,
    ImageResolution,
    Launch,
    CommandReadiness,
    Install,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cleanup => "cleanup",
            Self::Prerequisites => "prerequisites",
            Self::ImageResolution => "image-resolution",
            Self::Launch => "launch",
            Self::CommandReadiness => "command-readiness",
            Self::Install => "install",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FleetError {
    #[error("Credentials rejected for account '{account}': {message}")]
    CredentialInvalid { account: String, message: String },

    #[error("Provider call failed for account '{account}': {message}")]
    Transient { account: String, message: String },

    #[error("Account '{account}' quota is at the new-account ceiling ({quota} vCPU)")]
    ResourceLimit { account: String, quota: u32 },

    #[error("Provisioning failed for account '{account}' at {step}: {message}")]
    ProvisioningFailure {
        account: String,
        step: PipelineStep,
        message: String,
    },

    #[error("Failed to persist {target}: {message}")]
    PersistFailure { target: String, message: String },

    #[error("Invalid status transition for account '{account}': {from} -> {to}")]
    InvalidTransition {
        account: String,
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("No account matching '{0}'")]
    AccountNotFound(String),

    #[error("Backup account '{account}' is '{status}', expected 'available'")]
    BackupNotAvailable {
        account: String,
        status: AccountStatus,
    },

    #[error("No available backup account to replace '{0}'")]
    NoBackupAvailable(String),

    #[error("Router configuration not found: {0}")]
    RouterConfigMissing(String),

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Operation cancelled while waiting for {0}")]
    Cancelled(String),
}

impl FleetError {
    /// Whether this failure means the account's credentials are no longer usable.
    pub fn is_credential_invalid(&self) -> bool {
        matches!(self, Self::CredentialInvalid { .. })
    }
}
