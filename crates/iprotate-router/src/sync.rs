use std::path::{Path, PathBuf};

use anyhow::Context;
use iprotate_config::{ApiSection, RouterConfig};
use iprotate_core::{FleetError, InstanceRecord, RouterSection};
use tracing::{info, warn};

use crate::document::RouterDocument;

const CONFIG_TARGET: &str = "router config";
const RELOAD_TARGET: &str = "router reload";

/// A numeric router section currently served by some account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRef {
    pub port: u16,
    pub instance_id: Option<String>,
}

/// Reads, rewrites and reloads the router configuration file.
#[derive(Debug, Clone)]
pub struct RouterSync {
    path: PathBuf,
    region: String,
    port_floor: u16,
    restart_command: Vec<String>,
    api: ApiSection,
}

impl RouterSync {
    pub fn new(
        path: impl Into<PathBuf>,
        router: &RouterConfig,
        region: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            region: region.into(),
            port_floor: router.default_port_floor,
            restart_command: router.restart_command.clone(),
            api: router.api.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the config file; `None` when it does not exist yet.
    pub fn load(&self) -> Result<Option<RouterDocument>, FleetError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(RouterDocument::parse(&text))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(persist_failure(
                CONFIG_TARGET,
                format!("failed to read {}: {err}", self.path.display()),
            )),
        }
    }

    /// Endpoints whose `accessKey` is `access_key`.
    pub fn endpoints_for(&self, access_key: &str) -> Result<Vec<EndpointRef>, FleetError> {
        let doc = self
            .load()?
            .ok_or_else(|| FleetError::RouterConfigMissing(self.path.display().to_string()))?;
        Ok(doc
            .endpoints_for_access_key(access_key)
            .into_iter()
            .map(|(port, instance_id)| EndpointRef { port, instance_id })
            .collect())
    }

    /// Add one section per instance after the highest existing port, make
    /// sure the listener section exists, persist and reload.
    ///
    /// Returns the ports assigned, in instance order.
    pub async fn append_instances(
        &self,
        instances: &[InstanceRecord],
    ) -> Result<Vec<u16>, FleetError> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let mut doc = self.load()?.unwrap_or_default();
        if doc.ensure_api(&self.api) {
            info!(path = %self.path.display(), "router config: added [api] section");
        }

        let first = doc
            .next_port(self.port_floor)
            .ok_or_else(|| persist_failure(CONFIG_TARGET, "no free port left for new sections"))?;
        let mut assigned = Vec::with_capacity(instances.len());
        for (offset, instance) in instances.iter().enumerate() {
            let port = u16::try_from(offset)
                .ok()
                .and_then(|offset| first.checked_add(offset))
                .ok_or_else(|| persist_failure(CONFIG_TARGET, "ran out of ports"))?;
            let section = self.section_for(port, instance)?;
            doc.upsert_endpoint(&section);
            info!(
                section = port,
                instance = %instance.instance_id,
                account = %instance.account_id,
                "router config: endpoint added"
            );
            assigned.push(port);
        }

        self.persist(&doc)?;
        self.reload().await?;
        Ok(assigned)
    }

    /// Point existing sections at replacement instances, persist and reload.
    ///
    /// A section that no longer exists is recreated with a warning.
    pub async fn replace_sections(
        &self,
        replacements: &[(u16, InstanceRecord)],
    ) -> Result<(), FleetError> {
        let mut doc = self
            .load()?
            .ok_or_else(|| FleetError::RouterConfigMissing(self.path.display().to_string()))?;
        for (port, instance) in replacements {
            let section = self.section_for(*port, instance)?;
            if doc.upsert_endpoint(&section) {
                warn!(section = port, "router config: section missing during update, created");
            }
            info!(
                section = port,
                instance = %instance.instance_id,
                account = %instance.account_id,
                "router config: endpoint replaced"
            );
        }
        self.persist(&doc)?;
        self.reload().await
    }

    fn section_for(
        &self,
        port: u16,
        instance: &InstanceRecord,
    ) -> Result<RouterSection, FleetError> {
        RouterSection::for_instance(port, instance, &self.region).ok_or_else(|| {
            persist_failure(
                CONFIG_TARGET,
                format!("port {port} has no room for its HTTP port"),
            )
        })
    }

    /// Write the document next to the target and rename it into place.
    pub fn persist(&self, doc: &RouterDocument) -> Result<(), FleetError> {
        write_atomic(&self.path, doc.render().as_bytes())
            .map_err(|e| persist_failure(CONFIG_TARGET, format!("{e:#}")))
    }

    /// Run the configured restart command.
    pub async fn reload(&self) -> Result<(), FleetError> {
        let Some((program, args)) = self.restart_command.split_first() else {
            return Err(persist_failure(RELOAD_TARGET, "no restart command configured"));
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| {
                persist_failure(RELOAD_TARGET, format!("failed to run '{program}': {e}"))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(persist_failure(
                RELOAD_TARGET,
                format!(
                    "'{}' exited with {}: {}",
                    self.restart_command.join(" "),
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        info!(command = %self.restart_command.join(" "), "router reloaded");
        Ok(())
    }
}

fn persist_failure(target: &str, message: impl Into<String>) -> FleetError {
    FleetError::PersistFailure {
        target: target.to_string(),
        message: message.into(),
    }
}

fn write_atomic(target: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    std::io::Write::write_all(&mut tmp, data).context("Failed to write temp file")?;
    tmp.persist(target)
        .with_context(|| format!("Failed to persist to {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
