//! Full-fleet provisioning: one task per deployable account, then a single
//! router update for everything that came up.

use iprotate_core::naming::{ResourceNames, run_id};
use iprotate_core::{AccountRecord, AccountStatus, FleetError, InstanceRecord};
use iprotate_registry::InstancesUpdate;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::FleetContext;
use crate::pipeline::LaunchMode;
use crate::quota::{attempt_quota_increase, compute_instance_count};

/// What happened to one account during bootstrap.
#[derive(Debug)]
pub enum AccountOutcome {
    Deployed(Vec<InstanceRecord>),
    /// Quota is zero or the credentials were rejected.
    Suspended,
    /// Nothing to do this run (quota unknown or too small for one instance).
    Skipped,
    Failed(FleetError),
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub outcomes: Vec<(String, AccountOutcome)>,
    /// Router ports assigned to the new instances.
    pub ports: Vec<u16>,
}

impl BootstrapReport {
    pub fn instances(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.outcomes.iter().flat_map(|(_, outcome)| match outcome {
            AccountOutcome::Deployed(instances) => instances.as_slice(),
            _ => &[][..],
        })
    }

    pub fn deployed_accounts(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Deployed(_)))
    }

    pub fn failed_accounts(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&AccountOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Provision every `active`/`available` account in parallel, then append
/// all new instances to the router config in one write.
///
/// Per-account failures are recorded in the report; only the router update
/// can fail the whole run.
pub async fn run_bootstrap(ctx: &FleetContext) -> Result<BootstrapReport, FleetError> {
    let accounts = ctx.registry.snapshot().await?;
    let mut join_set = JoinSet::new();
    for account in accounts {
        if !account.status.is_deployable() {
            info!(account = %account.id, status = %account.status, "skipping account");
            continue;
        }
        let ctx = ctx.clone();
        join_set.spawn(async move {
            let outcome = deploy_account(&ctx, &account).await;
            (account.id, outcome)
        });
    }

    let mut report = BootstrapReport::default();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((id, outcome)) => report.outcomes.push((id, outcome)),
            Err(e) => error!(error = %e, "account task panicked"),
        }
    }
    report.outcomes.sort_by(|a, b| a.0.cmp(&b.0));

    let instances: Vec<InstanceRecord> = report.instances().cloned().collect();
    if instances.is_empty() {
        info!("bootstrap produced no instances, router config untouched");
        return Ok(report);
    }
    report.ports = ctx.router.append_instances(&instances).await?;
    info!(
        instances = instances.len(),
        accounts = report.deployed_accounts(),
        failed = report.failed_accounts(),
        "bootstrap complete"
    );
    Ok(report)
}

async fn deploy_account(ctx: &FleetContext, account: &AccountRecord) -> AccountOutcome {
    let config = ctx.config.as_ref();
    let pipeline = ctx.pipeline(account);
    let api = pipeline.api().clone();

    let reading = compute_instance_count(api.as_ref(), config, &account.id).await;
    let mut count = match reading.raw_quota {
        Some(0) => return suspend(ctx, account, "vCPU quota is zero").await,
        None => {
            warn!(account = %account.id, "quota unknown, skipping account this run");
            return AccountOutcome::Skipped;
        }
        Some(_) => reading.count,
    };

    if reading.is_low(config.cloud.low_quota_ceiling) {
        count = match attempt_quota_increase(
            api.as_ref(),
            config,
            &account.id,
            reading,
            &ctx.cancel,
        )
        .await
        {
            Ok(count) => count,
            Err(err) => return AccountOutcome::Failed(err),
        };
        if count == 0 {
            return suspend(ctx, account, "suspended during the quota increase").await;
        }
    }

    match pipeline.cleanup().await {
        Ok(_) => {}
        Err(err) if err.is_credential_invalid() => {
            return suspend(ctx, account, "credentials rejected during cleanup").await;
        }
        Err(err) => warn!(account = %account.id, error = %err, "cleanup failed, continuing"),
    }
    if count == 0 {
        info!(account = %account.id, "quota allows no instances");
        return AccountOutcome::Skipped;
    }

    let deployed = async {
        let image_id = pipeline.resolve_image().await?;
        pipeline
            .deploy(
                &image_id,
                &ResourceNames::bootstrap(&run_id()),
                count,
                LaunchMode::Batch,
            )
            .await
    }
    .await;

    match deployed {
        Ok(instances) => {
            let ids = instances.iter().map(|i| i.instance_id.clone()).collect();
            if let Err(err) = ctx
                .registry
                .transition(&account.id, AccountStatus::Active, InstancesUpdate::Replace(ids))
                .await
            {
                error!(account = %account.id, error = %err, "failed to record deployed instances");
            }
            AccountOutcome::Deployed(instances)
        }
        Err(err) if err.is_credential_invalid() => {
            warn!(account = %account.id, error = %err, "credentials rejected during provisioning");
            suspend(ctx, account, "credentials rejected").await
        }
        Err(err @ FleetError::Cancelled(_)) => {
            warn!(account = %account.id, error = %err, "provisioning interrupted");
            AccountOutcome::Failed(err)
        }
        Err(err) => {
            error!(account = %account.id, error = %err, "provisioning failed");
            if let Err(e) = ctx
                .registry
                .transition(&account.id, AccountStatus::Error, InstancesUpdate::Keep)
                .await
            {
                error!(account = %account.id, error = %e, "failed to mark account as error");
            }
            AccountOutcome::Failed(err)
        }
    }
}

/// Mark the account suspended; it no longer owns any instances.
async fn suspend(ctx: &FleetContext, account: &AccountRecord, reason: &str) -> AccountOutcome {
    warn!(account = %account.id, reason, "suspending account");
    if let Err(err) = ctx
        .registry
        .transition(&account.id, AccountStatus::Suspended, InstancesUpdate::Clear)
        .await
    {
        error!(account = %account.id, error = %err, "failed to suspend account");
    }
    AccountOutcome::Suspended
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
