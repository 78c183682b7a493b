//! Per-account provisioning: cleanup, identity/network prerequisites, image
//! lookup, launch, command readiness and install, with rollback of every
//! instance the attempt launched.

use std::sync::Arc;

use iprotate_cloud::api::{COMMAND_AGENT_POLICY_ARN, INSTANCE_TRUST_POLICY};
use iprotate_cloud::{
    CloudApi, CloudError, CommandStatus, CommandTarget, ImageFilter, ImageSummary, InstanceState,
    LaunchRequest, PollPolicy, PollStep, Poller, sleep_or_cancel,
};
use iprotate_config::{CloudConfig, FleetConfig};
use iprotate_core::naming::{ResourceNames, readable_name};
use iprotate_core::{AccountRecord, FleetError, InstanceRecord, PipelineStep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::backoff_policy;

const SECURITY_GROUP_DESCRIPTION: &str = "Security group for proxy fleet instances";

/// How instances of one attempt are addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    /// Bootstrap: many instances, install dispatched by tag.
    Batch,
    /// Failover: one instance, install dispatched by instance id.
    Single,
}

/// Identity and network resources an instance is launched with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prerequisites {
    pub instance_profile: String,
    pub security_group_id: Option<String>,
}

/// Provisioning steps bound to one account.
#[derive(Clone)]
pub struct ProvisioningPipeline {
    api: Arc<dyn CloudApi>,
    account: AccountRecord,
    config: Arc<FleetConfig>,
    cancel: CancellationToken,
}

impl ProvisioningPipeline {
    pub fn new(
        api: Arc<dyn CloudApi>,
        account: AccountRecord,
        config: Arc<FleetConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            account,
            config,
            cancel,
        }
    }

    pub fn account(&self) -> &AccountRecord {
        &self.account
    }

    pub fn api(&self) -> &Arc<dyn CloudApi> {
        &self.api
    }

    /// Terminate every live instance of the account and wait until they are gone.
    ///
    /// Returns how many instances were terminated.
    pub async fn cleanup(&self) -> Result<usize, FleetError> {
        let live = self
            .api
            .list_instances(&InstanceState::LIVE)
            .await
            .map_err(|e| self.step_error(PipelineStep::Cleanup, e))?;
        if live.is_empty() {
            debug!(account = %self.account.id, "cleanup: no live instances");
            return Ok(0);
        }

        let ids: Vec<String> = live.into_iter().map(|i| i.instance_id).collect();
        info!(account = %self.account.id, count = ids.len(), "cleanup: terminating leftover instances");
        self.api
            .terminate_instances(&ids)
            .await
            .map_err(|e| self.step_error(PipelineStep::Cleanup, e))?;

        let provision = &self.config.provision;
        let policy = backoff_policy(
            &self.config.polling,
            self.config.polling.state_interval_secs,
            provision.terminate_timeout_secs,
        );
        self.wait_for_state(&ids, InstanceState::Terminated, policy, PipelineStep::Cleanup)
            .await?;
        Ok(ids.len())
    }

    /// Newest image matching the configured filter.
    pub async fn resolve_image(&self) -> Result<String, FleetError> {
        match latest_image(self.api.as_ref(), &self.config.cloud).await {
            Ok(Some(image)) => {
                debug!(account = %self.account.id, image = %image.image_id, name = %image.name, "image resolved");
                Ok(image.image_id)
            }
            Ok(None) => Err(self.failure(
                PipelineStep::ImageResolution,
                format!(
                    "no image matches '{}'",
                    self.config.cloud.image_name_pattern
                ),
            )),
            Err(e) => Err(self.step_error(PipelineStep::ImageResolution, e)),
        }
    }

    /// Role, instance profile and security group for one attempt.
    ///
    /// Resources that already exist are reused.
    pub async fn prerequisites(&self, names: &ResourceNames) -> Result<Prerequisites, FleetError> {
        let step = PipelineStep::Prerequisites;
        let provision = &self.config.provision;

        match self.api.create_role(&names.role, INSTANCE_TRUST_POLICY).await {
            Ok(()) => {
                info!(account = %self.account.id, role = %names.role, "role created");
                self.api
                    .attach_role_policy(&names.role, COMMAND_AGENT_POLICY_ARN)
                    .await
                    .map_err(|e| self.step_error(step, e))?;
                sleep_or_cancel(&self.cancel, provision.role_propagation(), "role propagation")
                    .await?;
            }
            Err(e) if e.is_already_exists() => {
                debug!(account = %self.account.id, role = %names.role, "role already exists");
            }
            Err(e) => return Err(self.step_error(step, e)),
        }

        match self.api.create_instance_profile(&names.instance_profile).await {
            Ok(()) => {
                info!(account = %self.account.id, profile = %names.instance_profile, "instance profile created");
            }
            Err(e) if e.is_already_exists() => {
                debug!(account = %self.account.id, profile = %names.instance_profile, "instance profile already exists");
            }
            Err(e) => return Err(self.step_error(step, e)),
        }
        match self
            .api
            .add_role_to_instance_profile(&names.instance_profile, &names.role)
            .await
        {
            Ok(()) => {
                sleep_or_cancel(
                    &self.cancel,
                    provision.profile_propagation(),
                    "instance profile propagation",
                )
                .await?;
            }
            Err(e) if e.is_limit_exceeded() || e.is_already_exists() => {
                debug!(account = %self.account.id, profile = %names.instance_profile, "role already bound to profile");
            }
            Err(e) => return Err(self.step_error(step, e)),
        }

        let security_group_id = self.security_group(&names.security_group).await?;
        Ok(Prerequisites {
            instance_profile: names.instance_profile.clone(),
            security_group_id,
        })
    }

    async fn security_group(&self, name: &str) -> Result<Option<String>, FleetError> {
        let step = PipelineStep::Prerequisites;
        let Some(vpc_id) = self
            .api
            .default_vpc_id()
            .await
            .map_err(|e| self.step_error(step, e))?
        else {
            warn!(account = %self.account.id, "no default VPC, launching without a security group");
            return Ok(None);
        };

        if let Some(group_id) = self
            .api
            .find_security_group(&vpc_id, name)
            .await
            .map_err(|e| self.step_error(step, e))?
        {
            debug!(account = %self.account.id, group = %group_id, "reusing security group");
            return Ok(Some(group_id));
        }

        let group_id = self
            .api
            .create_security_group(&vpc_id, name, SECURITY_GROUP_DESCRIPTION)
            .await
            .map_err(|e| self.step_error(step, e))?;
        match self.api.authorize_all_ingress(&group_id).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(self.step_error(step, e)),
        }
        info!(account = %self.account.id, group = %group_id, "security group created");
        Ok(Some(group_id))
    }

    /// Launch `count` instances and wait until all of them are running.
    pub async fn launch(
        &self,
        image_id: &str,
        prerequisites: &Prerequisites,
        count: u32,
        tag: (&str, &str),
    ) -> Result<Vec<String>, FleetError> {
        let step = PipelineStep::Launch;
        let request = LaunchRequest {
            image_id: image_id.to_string(),
            instance_type: self.config.cloud.instance_type.clone(),
            count,
            instance_profile: Some(prerequisites.instance_profile.clone()),
            security_group_id: prerequisites.security_group_id.clone(),
            tags: vec![(tag.0.to_string(), tag.1.to_string())],
        };
        let ids = self
            .api
            .run_instances(&request)
            .await
            .map_err(|e| self.step_error(step, e))?;
        if ids.is_empty() {
            return Err(self.failure(step, "launch returned no instances"));
        }
        info!(account = %self.account.id, count = ids.len(), tag_key = %tag.0, "instances launched");

        let policy = backoff_policy(
            &self.config.polling,
            self.config.polling.state_interval_secs,
            self.config.provision.launch_timeout_secs,
        );
        if let Err(err) = self
            .wait_for_state(&ids, InstanceState::Running, policy, step)
            .await
        {
            self.terminate_best_effort(&ids).await;
            return Err(err);
        }
        Ok(ids)
    }

    /// Wait until every instance is registered with the command service and online.
    pub async fn wait_command_ready(
        &self,
        ids: &[String],
        mode: LaunchMode,
    ) -> Result<(), FleetError> {
        let step = PipelineStep::CommandReadiness;
        let polling = &self.config.polling;
        let provision = &self.config.provision;
        let policy = match mode {
            LaunchMode::Batch => backoff_policy(
                polling,
                polling.batch_ready_interval_secs,
                provision.batch_ready_timeout_secs,
            ),
            LaunchMode::Single => backoff_policy(
                polling,
                polling.single_ready_interval_secs,
                provision.single_ready_timeout_secs,
            ),
        };
        let poller = Poller::new("command agent registration", policy, self.cancel.clone());
        poller
            .run(move || self.probe_registrations(ids))
            .await
            .map_err(|e| self.timeout_as_failure(step, e))
    }

    async fn probe_registrations(&self, ids: &[String]) -> Result<PollStep<()>, FleetError> {
        match self.api.command_registrations(ids).await {
            Ok(registrations) => {
                let online = ids
                    .iter()
                    .filter(|id| {
                        registrations
                            .iter()
                            .any(|r| &r.instance_id == *id && r.is_online())
                    })
                    .count();
                debug!(account = %self.account.id, online, total = ids.len(), "command agent registration");
                if online == ids.len() {
                    Ok(PollStep::Ready(()))
                } else {
                    Ok(PollStep::Pending)
                }
            }
            Err(e) if e.is_authorization() => Err(e.into_fleet(&self.account.id)),
            Err(e) => {
                warn!(account = %self.account.id, error = %e, "registration check failed, retrying");
                Ok(PollStep::Pending)
            }
        }
    }

    /// Dispatch the install command and wait for every instance to finish it.
    pub async fn install(
        &self,
        ids: &[String],
        target: &CommandTarget,
        mode: LaunchMode,
    ) -> Result<(), FleetError> {
        let step = PipelineStep::Install;
        let provision = &self.config.provision;
        let command_id = self
            .api
            .send_command(target, &provision.install_command, provision.install_timeout_secs)
            .await
            .map_err(|e| self.step_error(step, e))?;
        info!(account = %self.account.id, command = %command_id, instances = ids.len(), "install dispatched");

        let polling = &self.config.polling;
        let policy = match mode {
            LaunchMode::Batch => backoff_policy(
                polling,
                polling.batch_install_interval_secs,
                provision.batch_install_wait_secs,
            ),
            LaunchMode::Single => backoff_policy(
                polling,
                polling.single_install_interval_secs,
                provision.single_install_wait_secs,
            ),
        };
        let poller = Poller::new("install command", policy, self.cancel.clone());
        let command_id = command_id.as_str();
        poller
            .run(move || self.probe_invocations(command_id, ids))
            .await
            .map_err(|e| self.timeout_as_failure(step, e))
    }

    async fn probe_invocations(
        &self,
        command_id: &str,
        ids: &[String],
    ) -> Result<PollStep<()>, FleetError> {
        let mut finished = 0;
        for id in ids {
            match self.api.command_invocation(command_id, id).await {
                Ok(invocation) if invocation.status.is_failure() => {
                    error!(
                        account = %self.account.id,
                        instance = %id,
                        status = %invocation.status,
                        stdout = %invocation.stdout.trim(),
                        stderr = %invocation.stderr.trim(),
                        "install failed"
                    );
                    return Err(self.failure(
                        PipelineStep::Install,
                        format!("instance {id} finished with {}", invocation.status),
                    ));
                }
                Ok(invocation) if invocation.status == CommandStatus::Success => {
                    finished += 1;
                }
                Ok(_) => {}
                Err(e) if e.is_invocation_pending() || e.is_throttling() => {}
                Err(e) => return Err(self.step_error(PipelineStep::Install, e)),
            }
        }
        debug!(account = %self.account.id, finished, total = ids.len(), "install progress");
        if finished == ids.len() {
            Ok(PollStep::Ready(()))
        } else {
            Ok(PollStep::Pending)
        }
    }

    /// Prerequisites, launch, readiness and install for `count` instances.
    ///
    /// Any failure after launch terminates the launched instances before the
    /// error is returned.
    pub async fn deploy(
        &self,
        image_id: &str,
        names: &ResourceNames,
        count: u32,
        mode: LaunchMode,
    ) -> Result<Vec<InstanceRecord>, FleetError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let prerequisites = self.prerequisites(names).await?;
        let tag_key = readable_name("project");
        let tag_value = readable_name("");
        let ids = self
            .launch(image_id, &prerequisites, count, (&tag_key, &tag_value))
            .await?;

        let target = match mode {
            LaunchMode::Batch => CommandTarget::Tag {
                key: tag_key,
                value: tag_value,
            },
            LaunchMode::Single => CommandTarget::Instances(ids.clone()),
        };
        let installed = async {
            self.wait_command_ready(&ids, mode).await?;
            self.install(&ids, &target, mode).await
        }
        .await;
        if let Err(err) = installed {
            warn!(account = %self.account.id, error = %err, "rolling back launched instances");
            self.terminate_best_effort(&ids).await;
            return Err(err);
        }

        info!(account = %self.account.id, count = ids.len(), "instances ready");
        Ok(ids
            .into_iter()
            .map(|id| InstanceRecord::new(id, &self.account))
            .collect())
    }

    /// Terminate `ids`, logging instead of failing.
    pub async fn terminate_best_effort(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        match self.api.terminate_instances(ids).await {
            Ok(()) => info!(account = %self.account.id, count = ids.len(), "instances terminated"),
            Err(e) => {
                warn!(account = %self.account.id, error = %e, ?ids, "failed to terminate instances")
            }
        }
    }

    async fn wait_for_state(
        &self,
        ids: &[String],
        wanted: InstanceState,
        policy: PollPolicy,
        step: PipelineStep,
    ) -> Result<(), FleetError> {
        let what = format!("instances to reach '{}'", wanted.as_str());
        let poller = Poller::new(what, policy, self.cancel.clone());
        poller
            .run(move || async move {
                match self.api.instance_states(ids).await {
                    Ok(states) => {
                        let reached = ids
                            .iter()
                            .filter(|id| {
                                states
                                    .iter()
                                    .any(|s| &s.instance_id == *id && s.state == wanted)
                            })
                            .count();
                        if reached == ids.len() {
                            Ok(PollStep::Ready(()))
                        } else {
                            Ok(PollStep::Pending)
                        }
                    }
                    Err(e) if e.is_throttling() => Ok(PollStep::Pending),
                    Err(e) => Err(self.step_error(step, e)),
                }
            })
            .await
            .map_err(|e| self.timeout_as_failure(step, e))
    }

    fn step_error(&self, step: PipelineStep, err: CloudError) -> FleetError {
        if err.is_authorization() {
            err.into_fleet(&self.account.id)
        } else {
            self.failure(step, err.to_string())
        }
    }

    fn failure(&self, step: PipelineStep, message: impl Into<String>) -> FleetError {
        FleetError::ProvisioningFailure {
            account: self.account.id.clone(),
            step,
            message: message.into(),
        }
    }

    fn timeout_as_failure(&self, step: PipelineStep, err: FleetError) -> FleetError {
        match err {
            FleetError::Timeout { .. } => self.failure(step, err.to_string()),
            other => other,
        }
    }
}

/// Newest image matching the configured owner/name/architecture filter.
pub async fn latest_image(
    api: &dyn CloudApi,
    cloud: &CloudConfig,
) -> Result<Option<ImageSummary>, CloudError> {
    let filter = ImageFilter {
        owner: cloud.image_owner.clone(),
        name_pattern: cloud.image_name_pattern.clone(),
        architecture: cloud.image_architecture.clone(),
    };
    let images = api.list_images(&filter).await?;
    Ok(images
        .into_iter()
        .max_by(|a, b| a.creation_date.cmp(&b.creation_date)))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
