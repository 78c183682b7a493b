//! Fleet orchestration: quota planning, provisioning, health checks and failover.

pub mod bootstrap;
pub mod context;
pub mod failover;
pub mod health;
pub mod pipeline;
pub mod quota;

#[cfg(test)]
pub(crate) mod fake;

pub use bootstrap::{AccountOutcome, BootstrapReport, run_bootstrap};
pub use context::FleetContext;
pub use failover::{FailoverController, FailoverReport, SectionReplacement};
pub use health::{CycleReport, HealthMonitor};
pub use pipeline::{LaunchMode, ProvisioningPipeline};
pub use quota::{QuotaReading, attempt_quota_increase, compute_instance_count};
