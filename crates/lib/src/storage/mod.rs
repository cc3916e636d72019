//! Attachments: local staging (served under /static) and object-storage upload.

mod attachment;
mod gcs;

pub use attachment::{timestamp_now, AttachmentName, AttachmentStaging, TIMESTAMP_FORMAT};
pub use gcs::GcsClient;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("attachment io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("storage api error: {0}")]
    Api(String),
    #[error("no storage credentials: {0}")]
    Token(String),
}

/// Bucket-addressed blob upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;
}
