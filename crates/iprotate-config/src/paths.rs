use std::path::PathBuf;

/// XDG app name used for the config directory.
pub const APP_NAME: &str = "cloud-iprotate";

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "IPROTATE_CONFIG";

fn project_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Config directory (`~/.config/cloud-iprotate` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_config_dir()
}

/// Resolve the config file path.
///
/// Lookup order: explicit path -> `IPROTATE_CONFIG` -> XDG config dir.
/// Returns `None` only when no explicit path is given and the home directory
/// cannot be determined (e.g. containers without HOME).
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|dir| dir.join("config.toml"))
}
