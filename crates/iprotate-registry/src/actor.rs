//! Single owner of the in-memory account collection.
//!
//! Every read and mutation is a message to one task, so concurrent pipeline
//! workers never race on the collection. Each successful mutation is
//! persisted before the reply is sent.

use std::collections::HashSet;

use iprotate_core::{AccountRecord, AccountStatus, FleetError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::store::AccountStore;

const REQUEST_QUEUE_CAPACITY: usize = 64;
const REGISTRY_TARGET: &str = "account registry";

/// What a status change does to `used_for_instances`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstancesUpdate {
    Keep,
    Replace(Vec<String>),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: String,
    pub to: AccountStatus,
    pub instances: InstancesUpdate,
}

impl StatusChange {
    pub fn new(id: impl Into<String>, to: AccountStatus, instances: InstancesUpdate) -> Self {
        Self {
            id: id.into(),
            to,
            instances,
        }
    }
}

enum Command {
    Snapshot(oneshot::Sender<Vec<AccountRecord>>),
    GetById(String, oneshot::Sender<Option<AccountRecord>>),
    GetByAccessKey(String, oneshot::Sender<Option<AccountRecord>>),
    FirstAvailable(oneshot::Sender<Option<AccountRecord>>),
    ClaimBackup {
        exclude: Option<String>,
        reply: oneshot::Sender<Option<AccountRecord>>,
    },
    Release(String),
    Apply {
        changes: Vec<StatusChange>,
        reply: oneshot::Sender<Result<Vec<AccountRecord>, FleetError>>,
    },
    Reload(oneshot::Sender<usize>),
}

/// Cloneable handle to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Load the store and spawn the owning task.
    pub fn spawn(store: AccountStore) -> Self {
        let accounts = store.load();
        info!(path = %store.path().display(), accounts = accounts.len(), "account registry loaded");
        Self::spawn_with(store, accounts)
    }

    /// Spawn with an explicit initial collection (nothing is read from disk).
    pub fn spawn_with(store: AccountStore, accounts: Vec<AccountRecord>) -> Self {
        let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let registry = Registry {
            store,
            accounts,
            reserved: HashSet::new(),
            unsaved: false,
        };
        tokio::spawn(registry.run(receiver));
        Self { sender }
    }

    pub async fn snapshot(&self) -> Result<Vec<AccountRecord>, FleetError> {
        self.request(Command::Snapshot).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<AccountRecord>, FleetError> {
        let id = id.to_string();
        self.request(|reply| Command::GetById(id, reply)).await
    }

    pub async fn get_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<Option<AccountRecord>, FleetError> {
        let key = access_key.to_string();
        self.request(|reply| Command::GetByAccessKey(key, reply))
            .await
    }

    /// First `available` record in registry order, ignoring claimed backups.
    pub async fn first_available(&self) -> Result<Option<AccountRecord>, FleetError> {
        self.request(Command::FirstAvailable).await
    }

    /// Pick and reserve the first `available` record other than `exclude`.
    ///
    /// A claimed record is skipped by later claims until it transitions or
    /// is [`release`](Self::release)d.
    pub async fn claim_backup(
        &self,
        exclude: Option<&str>,
    ) -> Result<Option<AccountRecord>, FleetError> {
        let exclude = exclude.map(str::to_string);
        self.request(|reply| Command::ClaimBackup { exclude, reply })
            .await
    }

    pub async fn release(&self, id: &str) {
        let _ = self.sender.send(Command::Release(id.to_string())).await;
    }

    /// Change one account's status.
    ///
    /// `PersistFailure` means the change was applied in memory but not
    /// written to disk.
    pub async fn transition(
        &self,
        id: &str,
        to: AccountStatus,
        instances: InstancesUpdate,
    ) -> Result<AccountRecord, FleetError> {
        let mut updated = self.apply(vec![StatusChange::new(id, to, instances)]).await?;
        updated.pop().ok_or_else(|| FleetError::AccountNotFound(id.to_string()))
    }

    /// Apply several changes as one unit: all are validated first, then
    /// applied and persisted with a single write.
    pub async fn apply(
        &self,
        changes: Vec<StatusChange>,
    ) -> Result<Vec<AccountRecord>, FleetError> {
        self.request(|reply| Command::Apply { changes, reply })
            .await?
    }

    /// Re-read the store from disk, replacing the in-memory collection.
    ///
    /// If an earlier write failed, that write is retried first; while it
    /// keeps failing the in-memory collection is kept as is. Returns the
    /// number of records now held.
    pub async fn reload(&self) -> Result<usize, FleetError> {
        self.request(Command::Reload).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, FleetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| registry_stopped())?;
        reply_rx.await.map_err(|_| registry_stopped())
    }
}

fn registry_stopped() -> FleetError {
    FleetError::PersistFailure {
        target: REGISTRY_TARGET.to_string(),
        message: "registry task stopped".to_string(),
    }
}

struct Registry {
    store: AccountStore,
    accounts: Vec<AccountRecord>,
    reserved: HashSet<String>,
    /// The in-memory collection holds changes the last write lost.
    unsaved: bool,
}

impl Registry {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.accounts.clone());
                }
                Command::GetById(id, reply) => {
                    let _ = reply.send(self.accounts.iter().find(|a| a.id == id).cloned());
                }
                Command::GetByAccessKey(key, reply) => {
                    let found = self.accounts.iter().find(|a| a.access_key == key).cloned();
                    let _ = reply.send(found);
                }
                Command::FirstAvailable(reply) => {
                    let _ = reply.send(self.first_available(None).cloned());
                }
                Command::ClaimBackup { exclude, reply } => {
                    let claimed = self.first_available(exclude.as_deref()).cloned();
                    if let Some(account) = &claimed {
                        debug!(account = %account.id, "backup claimed");
                        self.reserved.insert(account.id.clone());
                    }
                    let _ = reply.send(claimed);
                }
                Command::Release(id) => {
                    self.reserved.remove(&id);
                }
                Command::Apply { changes, reply } => {
                    let _ = reply.send(self.apply(changes));
                }
                Command::Reload(reply) => {
                    self.reload();
                    let _ = reply.send(self.accounts.len());
                }
            }
        }
        debug!("account registry task stopped");
    }

    fn reload(&mut self) {
        if self.unsaved {
            match self.persist() {
                Ok(()) => info!("unsaved account changes written before reload"),
                Err(err) => {
                    warn!(error = %err, "account store still not writable, keeping in-memory state instead of reloading");
                    return;
                }
            }
        }
        self.accounts = self.store.load();
        self.reserved
            .retain(|id| self.accounts.iter().any(|a| &a.id == id));
    }

    fn first_available(&self, exclude: Option<&str>) -> Option<&AccountRecord> {
        self.accounts.iter().enumerate().find_map(|(idx, a)| {
            let usable = a.status == AccountStatus::Available
                && !self.reserved.contains(&a.id)
                && exclude != Some(a.id.as_str())
                && !self.is_shadowed(idx);
            usable.then_some(a)
        })
    }

    /// An earlier record already owns this record's access key.
    fn is_shadowed(&self, idx: usize) -> bool {
        let key = &self.accounts[idx].access_key;
        self.accounts[..idx].iter().any(|a| &a.access_key == key)
    }

    fn persist(&mut self) -> Result<(), FleetError> {
        match self.store.save(&self.accounts) {
            Ok(()) => {
                self.unsaved = false;
                Ok(())
            }
            Err(err) => {
                self.unsaved = true;
                Err(FleetError::PersistFailure {
                    target: REGISTRY_TARGET.to_string(),
                    message: format!("{err:#}"),
                })
            }
        }
    }

    fn apply(&mut self, changes: Vec<StatusChange>) -> Result<Vec<AccountRecord>, FleetError> {
        let mut indices = Vec::with_capacity(changes.len());
        for change in &changes {
            let idx = self
                .accounts
                .iter()
                .position(|a| a.id == change.id)
                .ok_or_else(|| FleetError::AccountNotFound(change.id.clone()))?;
            let from = self.accounts[idx].status;
            if !from.can_transition_to(change.to) {
                return Err(FleetError::InvalidTransition {
                    account: change.id.clone(),
                    from,
                    to: change.to,
                });
            }
            indices.push(idx);
        }

        let mut updated = Vec::with_capacity(changes.len());
        for (change, idx) in changes.into_iter().zip(indices) {
            let account = &mut self.accounts[idx];
            let from = account.status;
            account.status = change.to;
            match change.instances {
                InstancesUpdate::Keep => {}
                InstancesUpdate::Replace(ids) => account.used_for_instances = ids,
                InstancesUpdate::Clear => account.used_for_instances.clear(),
            }
            self.reserved.remove(&account.id);
            info!(account = %account.id, %from, to = %change.to, instances = account.used_for_instances.len(), "account status updated");
            updated.push(account.clone());
        }

        if let Err(err) = self.persist() {
            warn!(path = %self.store.path().display(), error = %err, "failed to persist account registry, change kept in memory");
            return Err(err);
        }
        Ok(updated)
    }
}

#[cfg(test)]
#[path = "actor_tests.rs"]
mod tests;
