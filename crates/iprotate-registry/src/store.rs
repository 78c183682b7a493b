use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use iprotate_core::AccountRecord;
use tracing::{error, warn};

const LOCK_SUFFIX: &str = "lock";

/// JSON array of account records on disk.
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records, failing soft.
    ///
    /// A missing or unparsable file yields an empty list and an error log;
    /// callers treat that as "no accounts".
    pub fn load(&self) -> Vec<AccountRecord> {
        match self.try_load() {
            Ok(accounts) => accounts,
            Err(err) => {
                error!(path = %self.path.display(), error = %format!("{err:#}"), "failed to load account store");
                Vec::new()
            }
        }
    }

    /// Strict variant of [`load`](Self::load), used by diagnostics.
    pub fn try_load(&self) -> Result<Vec<AccountRecord>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read account store: {}", self.path.display()))?;
        let accounts: Vec<AccountRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse account store: {}", self.path.display()))?;
        report_duplicates(&accounts);
        Ok(accounts)
    }

    /// Replace the store contents atomically.
    ///
    /// Holds an exclusive advisory lock on a sidecar file while writing so a
    /// monitor daemon and a manual failover never interleave writes.
    pub fn save(&self, accounts: &[AccountRecord]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;

        let data =
            serde_json::to_vec_pretty(accounts).context("Failed to serialize account records")?;

        let lock_path = self.lock_path();
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| anyhow::anyhow!("Failed to acquire account store lock: {e}"))?;

        atomic_write(parent, &self.path, &data)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(LOCK_SUFFIX);
        self.path.with_file_name(name)
    }
}

/// Write data to a file atomically using temp-file + rename.
fn atomic_write(parent: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    std::io::Write::write_all(&mut tmp, data).context("Failed to write temp file")?;

    tmp.persist(target)
        .with_context(|| format!("Failed to persist to {}", target.display()))?;

    Ok(())
}

/// Log records that share an access key or id. Nothing is dropped: the
/// store is written back in full, and lookups use the first match.
fn report_duplicates(accounts: &[AccountRecord]) {
    let mut keys = HashSet::new();
    let mut ids = HashSet::new();
    for account in accounts {
        if !keys.insert(account.access_key.as_str()) {
            error!(
                account = %account.id,
                access_key = %account.access_key,
                "duplicate access key in account store, record ignored for lookups"
            );
        }
        if !ids.insert(account.id.as_str()) {
            warn!(account = %account.id, "duplicate account id in account store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iprotate_core::AccountStatus;
    use tempfile::tempdir;

    fn sample() -> Vec<AccountRecord> {
        let mut active = AccountRecord::new("primary_1", "AKIA1", "s1", AccountStatus::Active);
        active.used_for_instances = vec!["i-1".into(), "i-2".into()];
        vec![
            active,
            AccountRecord::new("backup_1", "AKIA2", "s2", AccountStatus::Available),
        ]
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("aws_accounts.json"));
        assert!(store.load().is_empty());
        assert!(store.try_load().is_err());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aws_accounts.json");
        std::fs::write(&path, "[{not json").unwrap();
        let store = AccountStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("nested").join("aws_accounts.json"));
        store.save(&sample()).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, sample());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"accessKey\": \"AKIA1\""));
        assert!(raw.contains("\"status\": \"available\""));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("aws_accounts.json"));
        store.save(&sample()).unwrap();
        store.save(&sample()).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["aws_accounts.json", "aws_accounts.json.lock"]);
    }

    #[test]
    fn test_duplicate_access_key_records_are_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aws_accounts.json");
        std::fs::write(
            &path,
            r#"[
                {"id":"a","accessKey":"K","secretKey":"1","status":"active"},
                {"id":"b","accessKey":"K","secretKey":"2","status":"available"},
                {"id":"c","accessKey":"L","secretKey":"3","status":"available"}
            ]"#,
        )
        .unwrap();

        let loaded = AccountStore::new(&path).load();
        let ids: Vec<&str> = loaded.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aws_accounts.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","accessKey":"K","secretKey":"1","status":"active","owner":"ops"}]"#,
        )
        .unwrap();
        let store = AccountStore::new(&path);
        let loaded = store.load();
        store.save(&loaded).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"owner\": \"ops\""));
    }
}
