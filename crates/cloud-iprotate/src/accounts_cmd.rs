use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::PathBuf;

use iprotate_config::FleetConfig;
use iprotate_core::{AccountRecord, OutputFormat};
use iprotate_registry::AccountStore;

pub(crate) fn handle_accounts_list(config_path: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let config = FleetConfig::load(config_path)?;
    let store = AccountStore::new(&config.paths.accounts_file);
    let accounts = store
        .try_load()
        .with_context(|| format!("Failed to load account store: {}", store.path().display()))?;
    print!("{}", render_accounts(&accounts, format)?);
    Ok(())
}

/// Render the registry. Secret keys never leave the store.
fn render_accounts(accounts: &[AccountRecord], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let listed: Vec<Value> = accounts
                .iter()
                .map(|a| {
                    json!({
                        "id": a.id,
                        "accessKey": a.access_key,
                        "status": a.status,
                        "used_for_instances": a.used_for_instances,
                    })
                })
                .collect();
            Ok(format!("{}\n", serde_json::to_string_pretty(&listed)?))
        }
        OutputFormat::Text => {
            if accounts.is_empty() {
                return Ok("No accounts registered.\n".to_string());
            }
            let mut out = format!(
                "{:<16} {:<22} {:<10} {}\n",
                "ID", "ACCESS KEY", "STATUS", "INSTANCES"
            );
            for a in accounts {
                out.push_str(&format!(
                    "{:<16} {:<22} {:<10} {}\n",
                    a.id,
                    a.access_key,
                    a.status,
                    a.used_for_instances.len()
                ));
            }
            Ok(out)
        }
    }
}
