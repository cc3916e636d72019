use super::{RegistryError, TenantRegistry};
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;

type Entries = BTreeMap<String, TenantRecord>;

/// Registry persisted as one JSON object (channel id -> record).
///
/// Several processes may share the file (the gateway and `relay register`). Writes hold an
/// exclusive lock on `<file>.lock` and merge into the current file contents; reads reload
/// when the file changed on disk or the channel is not cached.
pub struct FileRegistry {
    path: PathBuf,
    cache: RwLock<Snapshot>,
}

struct Snapshot {
    modified: Option<SystemTime>,
    entries: Entries,
}

fn parse_entries(contents: &str) -> Result<Entries, RegistryError> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(contents)?)
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Metadata is read before contents so a concurrent write shows up as a change next time.
fn read_snapshot(path: &Path) -> Result<Snapshot, RegistryError> {
    let modified = modified_at(path);
    let entries = match std::fs::read_to_string(path) {
        Ok(s) => parse_entries(&s)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(Snapshot { modified, entries })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Insert under the file lock: re-read, merge, write to a tmp file, rename into place.
fn locked_insert(path: &Path, record: TenantRecord) -> Result<Snapshot, RegistryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, ".lock"))?;
    FileExt::lock_exclusive(&lock)?;

    let Snapshot { mut entries, .. } = read_snapshot(path)?;
    entries.insert(record.channel_id().to_string(), record);
    let json = serde_json::to_string_pretty(&entries)?;
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;

    // Dropping `lock` releases it.
    Ok(Snapshot {
        modified: modified_at(path),
        entries,
    })
}

impl FileRegistry {
    /// Load from path. A missing or blank file starts empty; a corrupt file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || read_snapshot(&path)).await??
        };
        log::debug!(
            "loaded {} tenant(s) from {}",
            snapshot.entries.len(),
            path.display()
        );
        Ok(Self {
            path,
            cache: RwLock::new(snapshot),
        })
    }

    async fn reload(&self) -> Result<Option<SystemTime>, RegistryError> {
        let path = self.path.clone();
        let snapshot = tokio::task::spawn_blocking(move || read_snapshot(&path)).await??;
        let modified = snapshot.modified;
        *self.cache.write().await = snapshot;
        Ok(modified)
    }
}

#[async_trait]
impl TenantRegistry for FileRegistry {
    async fn get(&self, channel_id: &str) -> Result<Option<TenantRecord>, RegistryError> {
        let on_disk = {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || modified_at(&path)).await?
        };
        {
            let cache = self.cache.read().await;
            if cache.modified == on_disk {
                if let Some(record) = cache.entries.get(channel_id) {
                    return Ok(Some(record.clone()));
                }
            }
        }
        log::debug!("registry: reloading {} for {}", self.path.display(), channel_id);
        self.reload().await?;
        Ok(self.cache.read().await.entries.get(channel_id).cloned())
    }

    async fn put(&self, record: TenantRecord) -> Result<(), RegistryError> {
        let path = self.path.clone();
        let snapshot = tokio::task::spawn_blocking(move || locked_insert(&path, record)).await??;
        *self.cache.write().await = snapshot;
        Ok(())
    }
}
