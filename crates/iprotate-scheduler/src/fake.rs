//! Scripted in-memory cloud used by the scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iprotate_cloud::{
    CloudApi, CloudConnector, CloudError, CommandRegistration, CommandStatus, CommandTarget,
    ImageFilter, ImageSummary, InstanceState, InstanceSummary, Invocation, LaunchRequest,
};
use iprotate_config::FleetConfig;
use iprotate_core::{AccountRecord, AccountStatus};
use iprotate_registry::{AccountStore, RegistryHandle};
use tokio_util::sync::CancellationToken;

use crate::context::FleetContext;

pub(crate) fn auth_failure() -> CloudError {
    CloudError::api("AuthFailure", "AWS was not able to validate the provided access credentials")
}

#[derive(Default)]
struct State {
    instances: Vec<InstanceSummary>,
    /// Returned by successive quota lookups; the last value repeats.
    quota_script: VecDeque<Result<f64, CloudError>>,
    /// Errors returned by successive `run_instances` calls before launches succeed.
    launch_errors: VecDeque<CloudError>,
    /// Install outcome per launch ordinal (1-based); missing means `Success`.
    install_outcomes: HashMap<u32, CommandStatus>,
    offline: Vec<String>,
    launched_order: HashMap<String, u32>,
    launches: Vec<LaunchRequest>,
    terminate_calls: Vec<Vec<String>>,
    commands: Vec<CommandTarget>,
}

/// One account's worth of fake cloud.
pub(crate) struct FakeCloud {
    label: String,
    vcpus: u32,
    reject_credentials: bool,
    probe_error: Option<CloudError>,
    images: Vec<ImageSummary>,
    state: Mutex<State>,
    next_instance: AtomicU32,
    probes: AtomicU32,
}

impl FakeCloud {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            vcpus: 1,
            reject_credentials: false,
            probe_error: None,
            images: vec![
                ImageSummary {
                    image_id: "ami-old".to_string(),
                    name: "al2023-ami-2023.1-kernel-6.1-x86_64".to_string(),
                    creation_date: "2024-01-01T00:00:00.000Z".to_string(),
                },
                ImageSummary {
                    image_id: "ami-new".to_string(),
                    name: "al2023-ami-2023.6-kernel-6.1-x86_64".to_string(),
                    creation_date: "2025-06-01T00:00:00.000Z".to_string(),
                },
            ],
            state: Mutex::new(State {
                quota_script: VecDeque::from([Ok(32.0)]),
                ..State::default()
            }),
            next_instance: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        }
    }

    /// Every call fails with `AuthFailure`.
    pub(crate) fn rejecting(label: &str) -> Self {
        Self {
            reject_credentials: true,
            ..Self::new(label)
        }
    }

    pub(crate) fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    pub(crate) fn with_probe_error(mut self, err: CloudError) -> Self {
        self.probe_error = Some(err);
        self
    }

    pub(crate) fn with_images(mut self, images: Vec<ImageSummary>) -> Self {
        self.images = images;
        self
    }

    pub(crate) fn with_quota(self, script: &[f64]) -> Self {
        self.lock().quota_script = script.iter().map(|q| Ok(*q)).collect();
        self
    }

    pub(crate) fn with_quota_error(self, err: CloudError) -> Self {
        self.lock().quota_script = VecDeque::from([Err(err)]);
        self
    }

    pub(crate) fn with_launch_error(self, err: CloudError) -> Self {
        self.lock().launch_errors.push_back(err);
        self
    }

    pub(crate) fn with_install_outcome(self, launch_ordinal: u32, status: CommandStatus) -> Self {
        self.lock().install_outcomes.insert(launch_ordinal, status);
        self
    }

    pub(crate) fn with_running(self, ids: &[&str]) -> Self {
        self.lock().instances.extend(ids.iter().map(|id| InstanceSummary {
            instance_id: id.to_string(),
            state: InstanceState::Running,
        }));
        self
    }

    pub(crate) fn with_offline(self, launch_ordinal: u32) -> Self {
        let id = self.instance_id(launch_ordinal);
        self.lock().offline.push(id);
        self
    }

    pub(crate) fn instance_id(&self, launch_ordinal: u32) -> String {
        format!("i-{}-{launch_ordinal:03}", self.label)
    }

    pub(crate) fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn launches(&self) -> Vec<LaunchRequest> {
        self.lock().launches.clone()
    }

    pub(crate) fn terminate_calls(&self) -> Vec<Vec<String>> {
        self.lock().terminate_calls.clone()
    }

    pub(crate) fn commands(&self) -> Vec<CommandTarget> {
        self.lock().commands.clone()
    }

    pub(crate) fn state_of(&self, id: &str) -> Option<InstanceState> {
        self.lock()
            .instances
            .iter()
            .find(|i| i.instance_id == id)
            .map(|i| i.state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn check_credentials(&self) -> Result<(), CloudError> {
        if self.reject_credentials {
            Err(auth_failure())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn probe_credentials(&self) -> Result<(), CloudError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;
        match &self.probe_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_instances(
        &self,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, CloudError> {
        self.check_credentials()?;
        Ok(self
            .lock()
            .instances
            .iter()
            .filter(|i| states.contains(&i.state))
            .cloned()
            .collect())
    }

    async fn instance_states(&self, ids: &[String]) -> Result<Vec<InstanceSummary>, CloudError> {
        self.check_credentials()?;
        Ok(self
            .lock()
            .instances
            .iter()
            .filter(|i| ids.contains(&i.instance_id))
            .cloned()
            .collect())
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<(), CloudError> {
        self.check_credentials()?;
        let mut state = self.lock();
        state.terminate_calls.push(ids.to_vec());
        for instance in state.instances.iter_mut() {
            if ids.contains(&instance.instance_id) {
                instance.state = InstanceState::Terminated;
            }
        }
        Ok(())
    }

    async fn instance_vcpus(&self, _instance_type: &str) -> Result<u32, CloudError> {
        self.check_credentials()?;
        Ok(self.vcpus)
    }

    async fn vcpu_quota(&self, _service: &str, _quota_code: &str) -> Result<f64, CloudError> {
        self.check_credentials()?;
        let mut state = self.lock();
        let next = if state.quota_script.len() > 1 {
            state.quota_script.pop_front()
        } else {
            state.quota_script.front().cloned()
        };
        next.unwrap_or(Ok(0.0))
    }

    async fn create_role(&self, _name: &str, _trust_policy: &str) -> Result<(), CloudError> {
        self.check_credentials()
    }

    async fn attach_role_policy(&self, _role: &str, _policy_arn: &str) -> Result<(), CloudError> {
        self.check_credentials()
    }

    async fn create_instance_profile(&self, _name: &str) -> Result<(), CloudError> {
        self.check_credentials()
    }

    async fn add_role_to_instance_profile(
        &self,
        _profile: &str,
        _role: &str,
    ) -> Result<(), CloudError> {
        self.check_credentials()
    }

    async fn default_vpc_id(&self) -> Result<Option<String>, CloudError> {
        self.check_credentials()?;
        Ok(Some("vpc-default".to_string()))
    }

    async fn find_security_group(
        &self,
        _vpc_id: &str,
        _name: &str,
    ) -> Result<Option<String>, CloudError> {
        self.check_credentials()?;
        Ok(None)
    }

    async fn create_security_group(
        &self,
        _vpc_id: &str,
        _name: &str,
        _description: &str,
    ) -> Result<String, CloudError> {
        self.check_credentials()?;
        Ok(format!("sg-{}", self.label))
    }

    async fn authorize_all_ingress(&self, _group_id: &str) -> Result<(), CloudError> {
        self.check_credentials()
    }

    async fn list_images(&self, _filter: &ImageFilter) -> Result<Vec<ImageSummary>, CloudError> {
        self.check_credentials()?;
        Ok(self.images.clone())
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>, CloudError> {
        self.check_credentials()?;
        let mut state = self.lock();
        state.launches.push(request.clone());
        if let Some(err) = state.launch_errors.pop_front() {
            return Err(err);
        }
        let mut ids = Vec::new();
        for _ in 0..request.count {
            let ordinal = self.next_instance.fetch_add(1, Ordering::SeqCst) + 1;
            let id = self.instance_id(ordinal);
            state.launched_order.insert(id.clone(), ordinal);
            state.instances.push(InstanceSummary {
                instance_id: id.clone(),
                state: InstanceState::Running,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn command_registrations(
        &self,
        ids: &[String],
    ) -> Result<Vec<CommandRegistration>, CloudError> {
        self.check_credentials()?;
        let state = self.lock();
        Ok(ids
            .iter()
            .map(|id| CommandRegistration {
                instance_id: id.clone(),
                ping_status: if state.offline.contains(id) {
                    "ConnectionLost".to_string()
                } else {
                    "Online".to_string()
                },
            })
            .collect())
    }

    async fn send_command(
        &self,
        target: &CommandTarget,
        _command: &str,
        _timeout_secs: u64,
    ) -> Result<String, CloudError> {
        self.check_credentials()?;
        let mut state = self.lock();
        state.commands.push(target.clone());
        Ok(format!("cmd-{}", state.commands.len()))
    }

    async fn command_invocation(
        &self,
        _command_id: &str,
        instance_id: &str,
    ) -> Result<Invocation, CloudError> {
        self.check_credentials()?;
        let state = self.lock();
        let ordinal = state
            .launched_order
            .get(instance_id)
            .copied()
            .ok_or_else(|| CloudError::api("InvocationDoesNotExist", instance_id))?;
        let status = state
            .install_outcomes
            .get(&ordinal)
            .cloned()
            .unwrap_or(CommandStatus::Success);
        let stderr = if status.is_failure() {
            "install-service.sh: exceeded execution timeout".to_string()
        } else {
            String::new()
        };
        Ok(Invocation {
            status,
            stdout: String::new(),
            stderr,
        })
    }
}

/// Hands out the fake registered for an account's access key.
///
/// Unknown keys get a cloud that rejects every call.
#[derive(Default)]
pub(crate) struct FakeConnector {
    clouds: Mutex<HashMap<String, Arc<FakeCloud>>>,
}

impl FakeConnector {
    pub(crate) fn with(self, access_key: &str, cloud: FakeCloud) -> Self {
        self.clouds
            .lock()
            .unwrap()
            .insert(access_key.to_string(), Arc::new(cloud));
        self
    }

    pub(crate) fn cloud(&self, access_key: &str) -> Arc<FakeCloud> {
        self.clouds
            .lock()
            .unwrap()
            .get(access_key)
            .cloned()
            .unwrap()
    }
}

impl CloudConnector for FakeConnector {
    fn connect(&self, account: &AccountRecord) -> Arc<dyn CloudApi> {
        let mut clouds = self.clouds.lock().unwrap();
        let cloud = clouds
            .entry(account.access_key.clone())
            .or_insert_with(|| Arc::new(FakeCloud::rejecting(&account.id)))
            .clone();
        cloud
    }
}

/// Scheduler context over a [`FakeConnector`], with the account store and
/// router config in a temp dir.
pub(crate) struct Harness {
    pub(crate) ctx: FleetContext,
    pub(crate) connector: Arc<FakeConnector>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub(crate) fn new(connector: FakeConnector, accounts: Vec<AccountRecord>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.paths.accounts_file = dir.path().join("aws_accounts.json");
        config.paths.router_config = dir.path().join("config.conf");
        config.router.restart_command = vec!["true".to_string()];
        config.polling.jitter = 0.0;

        let store = AccountStore::new(&config.paths.accounts_file);
        store.save(&accounts).unwrap();
        let registry = RegistryHandle::spawn(store);
        let connector = Arc::new(connector);
        let ctx = FleetContext::new(
            config,
            connector.clone(),
            registry,
            CancellationToken::new(),
        );
        Self {
            ctx,
            connector,
            _dir: dir,
        }
    }

    pub(crate) fn write_router(&self, text: &str) {
        std::fs::write(&self.ctx.config.paths.router_config, text).unwrap();
    }

    pub(crate) fn router_text(&self) -> String {
        std::fs::read_to_string(&self.ctx.config.paths.router_config).unwrap()
    }

    /// Accounts as persisted on disk.
    pub(crate) fn stored(&self) -> Vec<AccountRecord> {
        AccountStore::new(&self.ctx.config.paths.accounts_file)
            .try_load()
            .unwrap()
    }

    pub(crate) fn stored_account(&self, id: &str) -> AccountRecord {
        self.stored().into_iter().find(|a| a.id == id).unwrap()
    }

    pub(crate) fn cloud(&self, access_key: &str) -> Arc<FakeCloud> {
        self.connector.cloud(access_key)
    }
}

pub(crate) fn account(id: &str, access_key: &str, status: AccountStatus) -> AccountRecord {
    AccountRecord::new(id, access_key, format!("secret-{id}"), status)
}
