//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Every field has a default so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Where tenant credentials are persisted.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// AI backend (Coze) settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Messaging platform (LINE) endpoints.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Attachment staging and object storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server bind, port, and public root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP (default 8080).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Public server root used for callback and attachment URLs (e.g. "https://relay.example.com").
    /// Overridden by RELAY_PUBLIC_URL env. When unset, derived from the request Host header.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_server_port() -> u16 {
    8080
}

fn default_server_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// JSON file on disk; survives restarts.
    #[default]
    File,

    /// In-process map; lost on restart.
    Memory,
}

/// Tenant registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    /// Registry file (default ~/.relay/tenants.json). Relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// AI backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    /// Deadline for one streaming round-trip, in seconds.
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    /// Reply sent to the user when the backend fails or times out.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    /// Text prompt sent alongside an image.
    #[serde(default = "default_image_prompt")]
    pub image_prompt: String,
}

fn default_ai_base_url() -> String {
    "https://api.coze.com".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    120
}

fn default_fallback_reply() -> String {
    "unable to obtain a response from the AI backend".to_string()
}

fn default_image_prompt() -> String {
    "what's in this picture".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            timeout_secs: default_ai_timeout_secs(),
            fallback_reply: default_fallback_reply(),
            image_prompt: default_image_prompt(),
        }
    }
}

/// LINE Messaging API endpoints. Overridable for tests or proxies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    #[serde(default = "default_messaging_api_base")]
    pub api_base: String,
    /// Host for binary content (images, video).
    #[serde(default = "default_messaging_data_api_base")]
    pub data_api_base: String,
    /// Per-request timeout for content downloads and replies, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_messaging_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_messaging_data_api_base() -> String {
    "https://api-data.line.me".to_string()
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            api_base: default_messaging_api_base(),
            data_api_base: default_messaging_data_api_base(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Attachment staging and Cloud Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Local directory for staged attachments, served under /static. Relative to the working directory.
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: PathBuf,
    #[serde(default = "default_gcs_base_url")]
    pub gcs_base_url: String,
    /// Metadata server endpoint used for a bearer token when no static token is configured.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    /// Static bearer token for Cloud Storage. Overridden by GCS_ACCESS_TOKEN env.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Per-request timeout for uploads and metadata token fetches, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attachments_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_gcs_base_url() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            attachments_dir: default_attachments_dir(),
            gcs_base_url: default_gcs_base_url(),
            metadata_url: default_metadata_url(),
            access_token: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Env value trimmed; None when unset or blank.
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the public server root: env RELAY_PUBLIC_URL overrides config. Trailing slashes are trimmed.
pub fn resolve_public_url(config: &Config) -> Option<String> {
    non_empty_env("RELAY_PUBLIC_URL")
        .or_else(|| {
            config
                .server
                .public_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .map(|s| s.trim_end_matches('/').to_string())
}

/// Resolve the Cloud Storage token: env GCS_ACCESS_TOKEN overrides config.
pub fn resolve_gcs_token(config: &Config) -> Option<String> {
    non_empty_env("GCS_ACCESS_TOKEN").or_else(|| {
        config
            .storage
            .access_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Registry file: `registry.path` if set (relative paths resolved against the config file's parent), otherwise `tenants.json` next to the config file.
pub fn resolve_registry_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.registry.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("tenants.json"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
