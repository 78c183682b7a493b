//! Periodic credential probes for active accounts, with automatic failover.

use iprotate_core::{AccountRecord, AccountStatus};
use iprotate_registry::InstancesUpdate;
use tracing::{error, info, warn};

use crate::context::FleetContext;
use crate::failover::FailoverController;

/// Summary of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub healthy: usize,
    /// Accounts found unhealthy and suspended this pass.
    pub suspended: Vec<String>,
    /// Suspended accounts whose sections moved to a backup.
    pub replaced: Vec<String>,
    /// Suspended accounts left without a working replacement.
    pub unresolved: Vec<String>,
}

pub struct HealthMonitor {
    ctx: FleetContext,
    failover: FailoverController,
}

impl HealthMonitor {
    pub fn new(ctx: FleetContext) -> Self {
        let failover = FailoverController::new(ctx.clone());
        Self { ctx, failover }
    }

    /// Probe every `active` account once and fail over the unhealthy ones.
    pub async fn run_cycle(&self) -> CycleReport {
        if let Err(err) = self.ctx.registry.reload().await {
            warn!(error = %err, "could not reload the account registry, using cached state");
        }
        let accounts = match self.ctx.registry.snapshot().await {
            Ok(accounts) => accounts,
            Err(err) => {
                error!(error = %err, "account registry unavailable");
                return CycleReport::default();
            }
        };

        let mut report = CycleReport::default();
        for account in accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Active)
        {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            report.probed += 1;
            if self.is_healthy(account).await {
                report.healthy += 1;
                continue;
            }
            self.handle_unhealthy(account, &mut report).await;
        }
        info!(
            probed = report.probed,
            healthy = report.healthy,
            suspended = report.suspended.len(),
            "health check pass finished"
        );
        report
    }

    /// Run passes at the configured interval until cancelled.
    pub async fn run(&self) {
        let interval = self.ctx.config.monitor.check_interval();
        info!(interval_secs = interval.as_secs(), "health monitor started");
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("health monitor stopped");
    }

    async fn is_healthy(&self, account: &AccountRecord) -> bool {
        let api = self.ctx.connector.connect(account);
        match api.probe_credentials().await {
            Ok(()) => {
                info!(account = %account.id, "account healthy");
                true
            }
            Err(e) if e.is_authorization() => {
                warn!(account = %account.id, error = %e, "account rejected credentials, likely suspended");
                false
            }
            Err(e) => {
                error!(account = %account.id, error = %e, "unexpected error while probing account");
                false
            }
        }
    }

    async fn handle_unhealthy(&self, account: &AccountRecord, report: &mut CycleReport) {
        let registry = &self.ctx.registry;
        if let Err(err) = registry
            .transition(&account.id, AccountStatus::Suspended, InstancesUpdate::Keep)
            .await
        {
            // PersistFailure still leaves the account suspended in memory.
            error!(account = %account.id, error = %err, "failed to persist suspension");
        }
        report.suspended.push(account.id.clone());

        let backup = match registry.claim_backup(Some(&account.id)).await {
            Ok(Some(backup)) => backup,
            Ok(None) => {
                error!(account = %account.id, "no available backup account, failover unresolved");
                report.unresolved.push(account.id.clone());
                return;
            }
            Err(err) => {
                error!(account = %account.id, error = %err, "backup search failed");
                report.unresolved.push(account.id.clone());
                return;
            }
        };

        info!(account = %account.id, backup = %backup.id, "backup found, starting failover");
        match self.failover.failover(&account.access_key, &backup.id).await {
            Ok(outcome) if outcome.is_failure() => {
                error!(account = %account.id, backup = %backup.id, "failover replaced no sections");
                report.unresolved.push(account.id.clone());
            }
            Ok(outcome) => {
                info!(
                    account = %account.id,
                    backup = %backup.id,
                    replaced = outcome.replaced.len(),
                    failed = outcome.failed.len(),
                    "failover finished"
                );
                report.replaced.push(account.id.clone());
            }
            Err(err) => {
                error!(account = %account.id, backup = %backup.id, error = %err, "failover failed");
                report.unresolved.push(account.id.clone());
            }
        }
        registry.release(&backup.id).await;
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
