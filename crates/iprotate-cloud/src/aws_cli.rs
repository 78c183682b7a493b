//! [`CloudApi`] backed by the `aws` command-line client.
//!
//! Each call runs the CLI with the account's credentials injected through the
//! child environment and `--output json`, then decodes stdout. Provider errors
//! are classified from the CLI's stderr.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iprotate_core::AccountRecord;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::process::Command;
use tracing::trace;

use crate::api::{
    CloudApi, CloudConnector, CommandRegistration, CommandStatus, CommandTarget, ImageFilter,
    ImageSummary, InstanceState, InstanceSummary, Invocation, LaunchRequest,
};
use crate::error::{CloudError, parse_cli_error};
use crate::exec::run_capture;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
const RUN_SHELL_DOCUMENT: &str = "AWS-RunShellScript";

/// Credential variables that would shadow the injected key pair.
const SHADOWING_ENV: &[&str] = &[
    "AWS_SESSION_TOKEN",
    "AWS_SECURITY_TOKEN",
    "AWS_PROFILE",
    "AWS_DEFAULT_PROFILE",
];

#[derive(Debug, Clone)]
pub struct AwsCliConnector {
    cli: String,
    region: String,
    call_timeout: Duration,
}

impl AwsCliConnector {
    pub fn new(cli: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            region: region.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

impl CloudConnector for AwsCliConnector {
    fn connect(&self, account: &AccountRecord) -> Arc<dyn CloudApi> {
        Arc::new(AwsCliClient {
            cli: self.cli.clone(),
            region: self.region.clone(),
            account_id: account.id.clone(),
            access_key: account.access_key.clone(),
            secret_key: account.secret_key.clone(),
            call_timeout: self.call_timeout,
        })
    }
}

struct AwsCliClient {
    cli: String,
    region: String,
    account_id: String,
    access_key: String,
    secret_key: String,
    call_timeout: Duration,
}

impl AwsCliClient {
    async fn call_raw(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<String, CloudError> {
        let mut cmd = Command::new(&self.cli);
        cmd.arg(service)
            .arg(operation)
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"])
            .env("AWS_ACCESS_KEY_ID", &self.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &self.secret_key)
            .env("AWS_DEFAULT_REGION", &self.region)
            .env("AWS_PAGER", "");
        for var in SHADOWING_ENV {
            cmd.env_remove(var);
        }

        trace!(account = %self.account_id, service, operation, "aws cli call");
        let output = run_capture(cmd, self.call_timeout)
            .await
            .map_err(|e| CloudError::Process(format!("{service} {operation}: {e:#}")))?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(parse_cli_error(&output.stderr))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<T, CloudError> {
        let stdout = self.call_raw(service, operation, args).await?;
        decode(service, operation, &stdout)
    }

    async fn call_unit(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<(), CloudError> {
        self.call_raw(service, operation, args).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(
    service: &str,
    operation: &str,
    stdout: &str,
) -> Result<T, CloudError> {
    let body = if stdout.trim().is_empty() { "{}" } else { stdout };
    serde_json::from_str(body)
        .map_err(|e| CloudError::Malformed(format!("{service} {operation}: {e}")))
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn filter(name: &str, values: &[&str]) -> String {
    format!("Name={name},Values={}", values.join(","))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<InstanceItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceItem {
    instance_id: String,
    state: StateItem,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateItem {
    name: String,
}

impl DescribeInstancesOutput {
    fn summaries(self) -> Result<Vec<InstanceSummary>, CloudError> {
        self.reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(|i| {
                let state = InstanceState::parse(&i.state.name).ok_or_else(|| {
                    CloudError::Malformed(format!("unknown instance state '{}'", i.state.name))
                })?;
                Ok(InstanceSummary {
                    instance_id: i.instance_id,
                    state,
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceTypesOutput {
    #[serde(default)]
    instance_types: Vec<InstanceTypeItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceTypeItem {
    #[serde(rename = "VCpuInfo")]
    vcpu_info: VcpuInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VcpuInfo {
    default_v_cpus: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetServiceQuotaOutput {
    quota: QuotaItem,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuotaItem {
    value: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVpcsOutput {
    #[serde(default)]
    vpcs: Vec<VpcItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcItem {
    vpc_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecurityGroupsOutput {
    #[serde(default)]
    security_groups: Vec<GroupItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupItem {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeImagesOutput {
    #[serde(default)]
    images: Vec<ImageItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageItem {
    image_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    creation_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    #[serde(default)]
    instances: Vec<LaunchedItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LaunchedItem {
    instance_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceInformationOutput {
    #[serde(default)]
    instance_information_list: Vec<InformationItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InformationItem {
    instance_id: String,
    #[serde(default)]
    ping_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendCommandOutput {
    command: CommandItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommandItem {
    command_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCommandInvocationOutput {
    status: String,
    #[serde(default)]
    standard_output_content: String,
    #[serde(default)]
    standard_error_content: String,
}

#[async_trait]
impl CloudApi for AwsCliClient {
    async fn probe_credentials(&self) -> Result<(), CloudError> {
        self.call_unit("ec2", "describe-regions", &[]).await
    }

    async fn list_instances(
        &self,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, CloudError> {
        let names: Vec<&str> = states.iter().map(InstanceState::as_str).collect();
        let out: DescribeInstancesOutput = self
            .call(
                "ec2",
                "describe-instances",
                &["--filters".to_string(), filter("instance-state-name", &names)],
            )
            .await?;
        out.summaries()
    }

    async fn instance_states(&self, ids: &[String]) -> Result<Vec<InstanceSummary>, CloudError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut argv = args(["--instance-ids"]);
        argv.extend(ids.iter().cloned());
        let out: DescribeInstancesOutput = self.call("ec2", "describe-instances", &argv).await?;
        out.summaries()
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<(), CloudError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut argv = args(["--instance-ids"]);
        argv.extend(ids.iter().cloned());
        self.call_unit("ec2", "terminate-instances", &argv).await
    }

    async fn instance_vcpus(&self, instance_type: &str) -> Result<u32, CloudError> {
        let out: DescribeInstanceTypesOutput = self
            .call(
                "ec2",
                "describe-instance-types",
                &args(["--instance-types", instance_type]),
            )
            .await?;
        out.instance_types
            .first()
            .map(|t| t.vcpu_info.default_v_cpus)
            .ok_or_else(|| CloudError::Malformed(format!("unknown instance type '{instance_type}'")))
    }

    async fn vcpu_quota(&self, service: &str, quota_code: &str) -> Result<f64, CloudError> {
        let out: GetServiceQuotaOutput = self
            .call(
                "service-quotas",
                "get-service-quota",
                &args(["--service-code", service, "--quota-code", quota_code]),
            )
            .await?;
        Ok(out.quota.value)
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<(), CloudError> {
        self.call_unit(
            "iam",
            "create-role",
            &args(["--role-name", name, "--assume-role-policy-document", trust_policy]),
        )
        .await
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), CloudError> {
        self.call_unit(
            "iam",
            "attach-role-policy",
            &args(["--role-name", role, "--policy-arn", policy_arn]),
        )
        .await
    }

    async fn create_instance_profile(&self, name: &str) -> Result<(), CloudError> {
        self.call_unit(
            "iam",
            "create-instance-profile",
            &args(["--instance-profile-name", name]),
        )
        .await
    }

    async fn add_role_to_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> Result<(), CloudError> {
        self.call_unit(
            "iam",
            "add-role-to-instance-profile",
            &args(["--instance-profile-name", profile, "--role-name", role]),
        )
        .await
    }

    async fn default_vpc_id(&self) -> Result<Option<String>, CloudError> {
        let out: DescribeVpcsOutput = self
            .call(
                "ec2",
                "describe-vpcs",
                &["--filters".to_string(), filter("isDefault", &["true"])],
            )
            .await?;
        Ok(out.vpcs.into_iter().next().map(|v| v.vpc_id))
    }

    async fn find_security_group(
        &self,
        vpc_id: &str,
        name: &str,
    ) -> Result<Option<String>, CloudError> {
        let out: DescribeSecurityGroupsOutput = self
            .call(
                "ec2",
                "describe-security-groups",
                &[
                    "--filters".to_string(),
                    filter("group-name", &[name]),
                    filter("vpc-id", &[vpc_id]),
                ],
            )
            .await?;
        Ok(out.security_groups.into_iter().next().map(|g| g.group_id))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, CloudError> {
        let out: GroupItem = self
            .call(
                "ec2",
                "create-security-group",
                &args([
                    "--group-name",
                    name,
                    "--description",
                    description,
                    "--vpc-id",
                    vpc_id,
                ]),
            )
            .await?;
        Ok(out.group_id)
    }

    async fn authorize_all_ingress(&self, group_id: &str) -> Result<(), CloudError> {
        let permissions = json!([{ "IpProtocol": "-1", "IpRanges": [{ "CidrIp": "0.0.0.0/0" }] }]);
        self.call_unit(
            "ec2",
            "authorize-security-group-ingress",
            &args([
                "--group-id",
                group_id,
                "--ip-permissions",
                permissions.to_string().as_str(),
            ]),
        )
        .await
    }

    async fn list_images(
        &self,
        image_filter: &ImageFilter,
    ) -> Result<Vec<ImageSummary>, CloudError> {
        let out: DescribeImagesOutput = self
            .call(
                "ec2",
                "describe-images",
                &[
                    "--owners".to_string(),
                    image_filter.owner.clone(),
                    "--filters".to_string(),
                    filter("name", &[image_filter.name_pattern.as_str()]),
                    filter("state", &["available"]),
                    filter("architecture", &[image_filter.architecture.as_str()]),
                ],
            )
            .await?;
        Ok(out
            .images
            .into_iter()
            .map(|i| ImageSummary {
                image_id: i.image_id,
                name: i.name,
                creation_date: i.creation_date,
            })
            .collect())
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>, CloudError> {
        let count = request.count.to_string();
        let mut argv = args([
            "--image-id",
            request.image_id.as_str(),
            "--instance-type",
            request.instance_type.as_str(),
            "--min-count",
            count.as_str(),
            "--max-count",
            count.as_str(),
        ]);
        if let Some(profile) = &request.instance_profile {
            argv.push("--iam-instance-profile".to_string());
            argv.push(format!("Name={profile}"));
        }
        if let Some(group) = &request.security_group_id {
            argv.push("--security-group-ids".to_string());
            argv.push(group.clone());
        }
        if !request.tags.is_empty() {
            let tags: Vec<_> = request
                .tags
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect();
            let spec = json!([{ "ResourceType": "instance", "Tags": tags }]);
            argv.push("--tag-specifications".to_string());
            argv.push(spec.to_string());
        }
        let out: RunInstancesOutput = self.call("ec2", "run-instances", &argv).await?;
        Ok(out.instances.into_iter().map(|i| i.instance_id).collect())
    }

    async fn command_registrations(
        &self,
        ids: &[String],
    ) -> Result<Vec<CommandRegistration>, CloudError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filters = json!([{ "Key": "InstanceIds", "Values": ids }]);
        let out: DescribeInstanceInformationOutput = self
            .call(
                "ssm",
                "describe-instance-information",
                &args(["--filters", filters.to_string().as_str()]),
            )
            .await?;
        Ok(out
            .instance_information_list
            .into_iter()
            .map(|i| CommandRegistration {
                instance_id: i.instance_id,
                ping_status: i.ping_status,
            })
            .collect())
    }

    async fn send_command(
        &self,
        target: &CommandTarget,
        command: &str,
        timeout_secs: u64,
    ) -> Result<String, CloudError> {
        let parameters = json!({ "commands": [command] });
        let timeout = timeout_secs.to_string();
        let mut argv = args([
            "--document-name",
            RUN_SHELL_DOCUMENT,
            "--timeout-seconds",
            timeout.as_str(),
            "--parameters",
            parameters.to_string().as_str(),
        ]);
        match target {
            CommandTarget::Instances(ids) => {
                argv.push("--instance-ids".to_string());
                argv.extend(ids.iter().cloned());
            }
            CommandTarget::Tag { key, value } => {
                let targets = json!([{ "Key": format!("tag:{key}"), "Values": [value] }]);
                argv.push("--targets".to_string());
                argv.push(targets.to_string());
            }
        }
        let out: SendCommandOutput = self.call("ssm", "send-command", &argv).await?;
        Ok(out.command.command_id)
    }

    async fn command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<Invocation, CloudError> {
        let out: GetCommandInvocationOutput = self
            .call(
                "ssm",
                "get-command-invocation",
                &args(["--command-id", command_id, "--instance-id", instance_id]),
            )
            .await?;
        Ok(Invocation {
            status: CommandStatus::parse(&out.status),
            stdout: out.standard_output_content,
            stderr: out.standard_error_content,
        })
    }
}

#[cfg(test)]
#[path = "aws_cli_tests.rs"]
mod tests;
