use anyhow::{Context, Result, bail};
use std::path::PathBuf;

use iprotate_config::FleetConfig;
use iprotate_config::paths::resolve_config_path;
use iprotate_core::OutputFormat;

pub(crate) fn handle_config_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path)
        .context("Cannot determine config directory; pass --config")?;
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    FleetConfig::save_default_template(&path)?;
    eprintln!("Wrote config template to: {}", path.display());
    Ok(())
}

pub(crate) fn handle_config_show(config_path: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let config = FleetConfig::load(config_path)?;
    match format {
        OutputFormat::Json => {
            let json_str = serde_json::to_string_pretty(&config)?;
            println!("{}", json_str);
        }
        OutputFormat::Text => {
            let toml_str = toml::to_string_pretty(&config)?;
            print!("{}", toml_str);
        }
    }
    Ok(())
}
