//! Tenant registry: channel id -> credential bundle.
//!
//! The dispatcher only reads; registration writes. Duplicate registration overwrites.

mod file;
mod memory;

pub use file::FileRegistry;
pub use memory::MemoryRegistry;

use crate::config::{self, Config, RegistryBackend};
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("registry task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Key-value lookup of tenants by LINE channel id.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Record registered under `channel_id`, if any.
    async fn get(&self, channel_id: &str) -> Result<Option<TenantRecord>, RegistryError>;
    /// Store `record` under its channel id, replacing any previous record.
    async fn put(&self, record: TenantRecord) -> Result<(), RegistryError>;
}

/// Open the registry selected by `registry.backend`.
pub async fn open_registry(
    config: &Config,
    config_path: &Path,
) -> Result<Arc<dyn TenantRegistry>, RegistryError> {
    match config.registry.backend {
        RegistryBackend::Memory => {
            log::info!("tenant registry: in-memory");
            Ok(Arc::new(MemoryRegistry::new()))
        }
        RegistryBackend::File => {
            let path = config::resolve_registry_path(config, config_path);
            log::info!("tenant registry: {}", path.display());
            Ok(Arc::new(FileRegistry::load(path).await?))
        }
    }
}
