//! vCPU quota reading and the new-account quota nudge.

use std::time::Duration;

use iprotate_cloud::{CloudApi, LaunchRequest, PollPolicy, PollStep, Poller};
use iprotate_config::FleetConfig;
use iprotate_core::FleetError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::latest_image;

/// Result of one quota lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReading {
    /// Instances of the configured shape the quota allows.
    pub count: u32,
    /// Raw vCPU quota. `Some(0)` when the credentials were rejected, `None`
    /// when the lookup failed for another reason.
    pub raw_quota: Option<u32>,
    /// vCPUs per instance of the configured shape (0 when unknown).
    pub vcpus: u32,
}

impl QuotaReading {
    fn unknown() -> Self {
        Self {
            count: 0,
            raw_quota: None,
            vcpus: 0,
        }
    }

    /// Quota sits at the ceiling handed to unverified accounts.
    pub fn is_low(&self, ceiling: u32) -> bool {
        matches!(self.raw_quota, Some(q) if q > 0 && q <= ceiling)
    }
}

/// How many instances of the configured shape the account may run.
pub async fn compute_instance_count(
    api: &dyn CloudApi,
    config: &FleetConfig,
    account_id: &str,
) -> QuotaReading {
    let cloud = &config.cloud;
    let lookup = async {
        let vcpus = api.instance_vcpus(&cloud.instance_type).await?;
        let quota = api
            .vcpu_quota(&cloud.vcpu_quota_service, &cloud.vcpu_quota_code)
            .await?;
        Ok::<_, iprotate_cloud::CloudError>((vcpus, quota))
    };
    match lookup.await {
        Ok((vcpus, quota)) => {
            let raw = if quota.is_finite() && quota > 0.0 {
                quota.floor().min(f64::from(u32::MAX)) as u32
            } else {
                0
            };
            let count = raw.checked_div(vcpus).unwrap_or(0);
            info!(
                account = %account_id,
                quota = raw,
                vcpus,
                count,
                instance_type = %cloud.instance_type,
                "vCPU quota read"
            );
            QuotaReading {
                count,
                raw_quota: Some(raw),
                vcpus,
            }
        }
        Err(e) if e.is_authorization() => {
            warn!(account = %account_id, error = %e, "quota lookup denied, account likely suspended");
            QuotaReading {
                raw_quota: Some(0),
                ..QuotaReading::unknown()
            }
        }
        Err(e) => {
            warn!(account = %account_id, error = %e, "quota lookup failed");
            QuotaReading::unknown()
        }
    }
}

/// Nudge the provider into verifying a new account by requesting an
/// oversized instance, then watch the quota for a while.
///
/// Returns the instance count to provision with. Only cancellation is an error.
pub async fn attempt_quota_increase(
    api: &dyn CloudApi,
    config: &FleetConfig,
    account_id: &str,
    initial: QuotaReading,
    cancel: &CancellationToken,
) -> Result<u32, FleetError> {
    let cloud = &config.cloud;
    // What the measured quota already allows.
    let fallback = initial.count;

    let image_id = match latest_image(api, cloud).await {
        Ok(Some(image)) => image.image_id,
        Ok(None) => {
            warn!(account = %account_id, "no image for the quota nudge, continuing with low quota");
            return Ok(fallback);
        }
        Err(e) => {
            warn!(account = %account_id, error = %e, "image lookup for the quota nudge failed, continuing with low quota");
            return Ok(fallback);
        }
    };

    let request = LaunchRequest {
        image_id,
        instance_type: cloud.quota_trigger_instance_type.clone(),
        count: 1,
        instance_profile: None,
        security_group_id: None,
        tags: Vec::new(),
    };
    info!(
        account = %account_id,
        instance_type = %cloud.quota_trigger_instance_type,
        "requesting oversized instance to trigger quota review"
    );
    match api.run_instances(&request).await {
        Err(e) if e.is_capacity_limit() => {
            info!(account = %account_id, code = e.code().unwrap_or_default(), "quota review triggered");
        }
        Err(e) => {
            warn!(account = %account_id, error = %e, "unexpected error while triggering quota review, continuing with low quota");
            return Ok(fallback);
        }
        Ok(ids) => {
            warn!(account = %account_id, ?ids, "oversized instance launched unexpectedly, terminating it");
            if let Err(e) = api.terminate_instances(&ids).await {
                warn!(account = %account_id, error = %e, "failed to terminate the oversized instance");
            }
            return Ok(fallback);
        }
    }

    let provision = &config.provision;
    let policy = PollPolicy::fixed(
        Duration::from_secs(provision.quota_poll_interval_secs),
        Duration::from_secs(provision.quota_poll_timeout_secs),
    )
    .with_jitter(config.polling.jitter);
    let ceiling = cloud.low_quota_ceiling;
    let poller = Poller::new("quota increase", policy, cancel.clone());
    let outcome = poller
        .run(move || async move {
            let reading = compute_instance_count(api, config, account_id).await;
            Ok(match reading.raw_quota {
                Some(q) if q > ceiling => {
                    info!(account = %account_id, quota = q, "quota raised");
                    PollStep::Ready(reading.count)
                }
                Some(0) => {
                    warn!(account = %account_id, "account suspended while waiting for the quota increase");
                    PollStep::Ready(0)
                }
                _ => PollStep::Pending,
            })
        })
        .await;

    match outcome {
        Ok(count) => Ok(count),
        Err(FleetError::Timeout { secs, .. }) => {
            warn!(account = %account_id, secs, "quota did not increase in time, continuing with current quota");
            Ok(compute_instance_count(api, config, account_id).await.count)
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
#[path = "quota_tests.rs"]
mod tests;
