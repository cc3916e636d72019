//! Initialize the configuration directory: create ~/.relay, a default config, and the attachments directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with defaults and `storage.attachmentsDir` set to `<config dir>/static` if missing.
/// - Creates the attachments directory named by the (existing or new) config.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let mut config = Config::default();
        config.storage.attachments_dir = config_dir.join("static");
        let json = serde_json::to_string_pretty(&config).context("encoding default config")?;
        std::fs::write(config_path, json)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, keeping it", config_path.display());
    }

    let (config, _) = crate::config::load_config(Some(config_path.to_path_buf()))?;
    let attachments = &config.storage.attachments_dir;
    if !attachments.exists() {
        std::fs::create_dir_all(attachments)
            .with_context(|| format!("creating attachments directory {}", attachments.display()))?;
        log::info!("created attachments directory at {}", attachments.display());
    }

    Ok(config_dir.to_path_buf())
}
