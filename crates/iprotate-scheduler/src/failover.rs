//! Targeted failover: move every router section served by one account's
//! access key onto fresh instances in a backup account.

use iprotate_core::naming::{ResourceNames, run_id};
use iprotate_core::{AccountRecord, AccountStatus, FleetError, InstanceRecord};
use iprotate_registry::{InstancesUpdate, StatusChange};
use iprotate_router::EndpointRef;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::FleetContext;
use crate::pipeline::{LaunchMode, ProvisioningPipeline};

/// One router section now served by a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionReplacement {
    pub port: u16,
    pub old_instance: Option<String>,
    pub new_instance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailoverReport {
    pub backup_id: String,
    pub replaced: Vec<SectionReplacement>,
    /// Sections that kept pointing at the old account.
    pub failed: Vec<u16>,
}

impl FailoverReport {
    /// Some sections were moved and some were not.
    pub fn is_partial(&self) -> bool {
        !self.replaced.is_empty() && !self.failed.is_empty()
    }

    /// Every section that needed a replacement failed.
    pub fn is_failure(&self) -> bool {
        self.replaced.is_empty() && !self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct FailoverController {
    ctx: FleetContext,
}

impl FailoverController {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    /// Replace every section whose `accessKey` is `old_access_key` with a new
    /// instance in the `available` account `backup_id`.
    ///
    /// Sections are judged individually; the report lists which moved. The
    /// registry and router are only touched when at least one section moved,
    /// or when no section referenced the old key at all.
    pub async fn failover(
        &self,
        old_access_key: &str,
        backup_id: &str,
    ) -> Result<FailoverReport, FleetError> {
        let registry = &self.ctx.registry;
        let backup = registry
            .get_by_id(backup_id)
            .await?
            .ok_or_else(|| FleetError::AccountNotFound(backup_id.to_string()))?;
        if backup.status != AccountStatus::Available {
            return Err(FleetError::BackupNotAvailable {
                account: backup.id,
                status: backup.status,
            });
        }
        let old = registry.get_by_access_key(old_access_key).await?;
        match &old {
            Some(account) => {
                info!(old = %account.id, backup = %backup.id, "failover started")
            }
            None => warn!(
                backup = %backup.id,
                "no account owns the old access key, repairing router config only"
            ),
        }

        let endpoints = self.ctx.router.endpoints_for(old_access_key)?;
        let mut report = FailoverReport {
            backup_id: backup.id.clone(),
            ..FailoverReport::default()
        };
        if endpoints.is_empty() {
            info!(backup = %backup.id, "no router sections use the old access key");
            if let Some(old) = &old {
                self.retire(old).await?;
            }
            return Ok(report);
        }

        let pipeline = self.ctx.pipeline(&backup);
        let image_id = match self.prepare_backup(&pipeline).await {
            Ok(image_id) => image_id,
            Err(err) => {
                if err.is_credential_invalid() {
                    warn!(backup = %backup.id, error = %err, "backup credentials rejected, suspending backup");
                    registry
                        .transition(&backup.id, AccountStatus::Suspended, InstancesUpdate::Keep)
                        .await?;
                }
                return Err(err);
            }
        };

        let outcomes = replace_sections(&pipeline, &image_id, endpoints).await;
        let mut new_instances: Vec<(u16, InstanceRecord)> = Vec::new();
        for (endpoint, outcome) in outcomes {
            match outcome {
                Ok(instance) => {
                    report.replaced.push(SectionReplacement {
                        port: endpoint.port,
                        old_instance: endpoint.instance_id,
                        new_instance: instance.instance_id.clone(),
                    });
                    new_instances.push((endpoint.port, instance));
                }
                Err(err) => {
                    error!(section = endpoint.port, backup = %backup.id, error = %err, "section replacement failed");
                    report.failed.push(endpoint.port);
                }
            }
        }
        report.replaced.sort_by_key(|r| r.port);
        report.failed.sort_unstable();
        new_instances.sort_by_key(|(port, _)| *port);

        if new_instances.is_empty() {
            error!(backup = %backup.id, sections = report.failed.len(), "no section could be replaced");
            registry.release(&backup.id).await;
            return Ok(report);
        }

        let mut changes = Vec::with_capacity(2);
        if let Some(old) = &old {
            if old.status.can_transition_to(AccountStatus::Suspended) {
                changes.push(StatusChange::new(
                    &old.id,
                    AccountStatus::Suspended,
                    InstancesUpdate::Clear,
                ));
            } else {
                warn!(old = %old.id, status = %old.status, "old account left unchanged");
            }
        }
        let new_ids = new_instances
            .iter()
            .map(|(_, i)| i.instance_id.clone())
            .collect();
        changes.push(StatusChange::new(
            &backup.id,
            AccountStatus::Active,
            InstancesUpdate::Replace(new_ids),
        ));
        let recorded = registry.apply(changes).await;
        if let Err(err) = &recorded {
            error!(backup = %backup.id, error = %err, "failed to record failover in the registry");
        }

        self.ctx.router.replace_sections(&new_instances).await?;
        recorded?;

        if let Some(old) = &old {
            self.terminate_old(old, &report).await;
        }
        info!(
            backup = %backup.id,
            replaced = report.replaced.len(),
            failed = report.failed.len(),
            "failover complete"
        );
        Ok(report)
    }

    async fn prepare_backup(&self, pipeline: &ProvisioningPipeline) -> Result<String, FleetError> {
        let removed = pipeline.cleanup().await?;
        if removed > 0 {
            info!(backup = %pipeline.account().id, removed, "backup account cleaned up");
        }
        pipeline.resolve_image().await
    }

    async fn retire(&self, old: &AccountRecord) -> Result<(), FleetError> {
        if !old.status.can_transition_to(AccountStatus::Suspended) {
            warn!(old = %old.id, status = %old.status, "old account left unchanged");
            return Ok(());
        }
        self.ctx
            .registry
            .transition(&old.id, AccountStatus::Suspended, InstancesUpdate::Clear)
            .await?;
        Ok(())
    }

    /// Terminate the replaced instances under the old credentials.
    async fn terminate_old(&self, old: &AccountRecord, report: &FailoverReport) {
        let mut ids: Vec<String> = report
            .replaced
            .iter()
            .filter_map(|r| r.old_instance.clone())
            .collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return;
        }
        let api = self.ctx.connector.connect(old);
        match api.terminate_instances(&ids).await {
            Ok(()) => info!(old = %old.id, count = ids.len(), "old instances terminated"),
            Err(e) => {
                warn!(old = %old.id, error = %e, "could not terminate old instances")
            }
        }
    }
}

/// One task per section; each launches and installs a single instance.
async fn replace_sections(
    pipeline: &ProvisioningPipeline,
    image_id: &str,
    endpoints: Vec<EndpointRef>,
) -> Vec<(EndpointRef, Result<InstanceRecord, FleetError>)> {
    let mut join_set = JoinSet::new();
    for endpoint in endpoints {
        let pipeline = pipeline.clone();
        let image_id = image_id.to_string();
        join_set.spawn(async move {
            info!(section = endpoint.port, account = %pipeline.account().id, "replacing section");
            let names = ResourceNames::replacement(&run_id());
            let result = pipeline
                .deploy(&image_id, &names, 1, LaunchMode::Single)
                .await
                .and_then(|mut instances| {
                    instances.pop().ok_or_else(|| FleetError::ProvisioningFailure {
                        account: pipeline.account().id.clone(),
                        step: iprotate_core::PipelineStep::Launch,
                        message: "no instance launched".to_string(),
                    })
                });
            (endpoint, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "section task panicked"),
        }
    }
    outcomes
}

#[cfg(test)]
#[path = "failover_tests.rs"]
mod tests;
