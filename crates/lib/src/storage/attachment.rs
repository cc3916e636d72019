//! Deterministic attachment names and the local staging directory.

use crate::storage::StorageError;
use std::path::PathBuf;

/// `strftime` format of the timestamp embedded in attachment names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Name parts for one received image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentName {
    pub sender_id: String,
    pub media_id: String,
    pub timestamp: String,
}

impl AttachmentName {
    pub fn new(
        sender_id: impl Into<String>,
        media_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            media_id: media_id.into(),
            timestamp: timestamp.into(),
        }
    }

    /// `{sender}_{media}_{timestamp}.jpg`, the staged file (and /static path segment).
    pub fn local_file_name(&self) -> String {
        format!("{}_{}_{}.jpg", self.sender_id, self.media_id, self.timestamp)
    }

    /// `{sender}/{media}_{timestamp}.jpg`, the key inside the tenant's bucket.
    pub fn object_key(&self) -> String {
        format!("{}/{}_{}.jpg", self.sender_id, self.media_id, self.timestamp)
    }

    /// `{root}/static/{local_file_name}`, the URL handed to the AI backend.
    pub fn public_url(&self, server_root: &str) -> String {
        format!(
            "{}/static/{}",
            server_root.trim_end_matches('/'),
            self.local_file_name()
        )
    }
}

/// Directory holding staged attachments. Files are kept after upload.
#[derive(Debug, Clone)]
pub struct AttachmentStaging {
    dir: PathBuf,
}

impl AttachmentStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write bytes under the attachment's local file name, creating the directory if needed.
    pub async fn save(&self, name: &AttachmentName, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name.local_file_name());
        tokio::fs::write(&path, bytes).await?;
        log::debug!("attachment staged at {}", path.display());
        Ok(path)
    }

    /// Path for a requested file name, or None if the name could escape the directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.contains("..")
        {
            return None;
        }
        Some(self.dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> AttachmentName {
        AttachmentName::new("U123", "4567", "20240131235959")
    }

    #[test]
    fn deterministic_names() {
        let n = name();
        assert_eq!(n.local_file_name(), "U123_4567_20240131235959.jpg");
        assert_eq!(n.object_key(), "U123/4567_20240131235959.jpg");
        assert_eq!(
            n.public_url("https://relay.example.com/"),
            "https://relay.example.com/static/U123_4567_20240131235959.jpg"
        );
    }

    #[test]
    fn timestamp_has_fourteen_digits() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let staging = AttachmentStaging::new("/srv/static");
        assert_eq!(
            staging.resolve("a.jpg"),
            Some(PathBuf::from("/srv/static/a.jpg"))
        );
        assert_eq!(staging.resolve("../etc/passwd"), None);
        assert_eq!(staging.resolve("sub/a.jpg"), None);
        assert_eq!(staging.resolve(""), None);
    }

    #[tokio::test]
    async fn save_creates_dir_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let staging = AttachmentStaging::new(dir.path().join("static"));
        let path = staging.save(&name(), b"jpeg-bytes").await.unwrap();
        assert_eq!(path, dir.path().join("static").join("U123_4567_20240131235959.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg-bytes");
    }
}
