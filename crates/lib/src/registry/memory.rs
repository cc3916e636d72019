use super::{RegistryError, TenantRegistry};
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process registry. Used for tests and `registry.backend = "memory"`.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<HashMap<String, TenantRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantRegistry for MemoryRegistry {
    async fn get(&self, channel_id: &str) -> Result<Option<TenantRecord>, RegistryError> {
        Ok(self.inner.read().await.get(channel_id).cloned())
    }

    async fn put(&self, record: TenantRecord) -> Result<(), RegistryError> {
        self.inner
            .write()
            .await
            .insert(record.channel_id().to_string(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::RegistrationForm;

    fn record(channel_id: &str, bucket: &str) -> TenantRecord {
        let form = RegistrationForm {
            line_channel_id: channel_id.to_string(),
            cloud_storage_bucket_name: bucket.to_string(),
            ..Default::default()
        };
        TenantRecord::new(form.into(), "http://localhost")
    }

    #[tokio::test]
    async fn unknown_channel_is_none() {
        let reg = MemoryRegistry::new();
        assert!(reg.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let reg = MemoryRegistry::new();
        reg.put(record("c1", "first")).await.unwrap();
        reg.put(record("c1", "second")).await.unwrap();
        let got = reg.get("c1").await.unwrap().unwrap();
        assert_eq!(got.credentials.cloud_storage_bucket_name, "second");
    }
}
