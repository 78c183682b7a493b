use std::sync::Arc;
use std::time::Duration;

use iprotate_cloud::{CloudConnector, PollPolicy};
use iprotate_config::{FleetConfig, PollingConfig};
use iprotate_core::AccountRecord;
use iprotate_registry::RegistryHandle;
use iprotate_router::RouterSync;
use tokio_util::sync::CancellationToken;

use crate::pipeline::ProvisioningPipeline;

/// Shared handles every flow works with. Cheap to clone into tasks.
#[derive(Clone)]
pub struct FleetContext {
    pub config: Arc<FleetConfig>,
    pub connector: Arc<dyn CloudConnector>,
    pub registry: RegistryHandle,
    pub router: RouterSync,
    pub cancel: CancellationToken,
}

impl FleetContext {
    pub fn new(
        config: FleetConfig,
        connector: Arc<dyn CloudConnector>,
        registry: RegistryHandle,
        cancel: CancellationToken,
    ) -> Self {
        let router = RouterSync::new(
            &config.paths.router_config,
            &config.router,
            &config.cloud.region,
        );
        Self {
            config: Arc::new(config),
            connector,
            registry,
            router,
            cancel,
        }
    }

    /// Pipeline bound to `account`'s credentials.
    pub fn pipeline(&self, account: &AccountRecord) -> ProvisioningPipeline {
        ProvisioningPipeline::new(
            self.connector.connect(account),
            account.clone(),
            self.config.clone(),
            self.cancel.clone(),
        )
    }
}

/// Backoff policy for a wait that starts at `interval_secs`.
pub(crate) fn backoff_policy(
    polling: &PollingConfig,
    interval_secs: u64,
    deadline_secs: u64,
) -> PollPolicy {
    PollPolicy::fixed(
        Duration::from_secs(interval_secs),
        Duration::from_secs(deadline_secs),
    )
    .with_backoff(
        polling.multiplier,
        Duration::from_secs(polling.max_interval_secs),
    )
    .with_jitter(polling.jitter)
}
