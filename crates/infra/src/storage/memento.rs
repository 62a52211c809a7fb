//! JSON file-backed [`Memento`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use credcache_core::Memento;
use credcache_domain::Result;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::InfraError;

/// Small state persisted as one JSON object.
///
/// Several processes may share the file. Reads go back to disk and fall back
/// to the last good copy in memory; updates re-read the file under the write
/// lock and merge the new key into it, so keys written elsewhere survive.
/// Each update rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a torn file.
pub struct JsonFileMemento {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileMemento {
    /// Load `path`, starting empty when it does not exist or is corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match read_snapshot(&path) {
            Ok(values) => values.unwrap_or_default(),
            Err(Snapshot::Corrupt(err)) => {
                warn!(path = %path.display(), error = %err, "state file corrupt; starting empty");
                Map::new()
            }
            Err(Snapshot::Io(err)) => return Err(InfraError::from(err).into()),
        };
        debug!(path = %path.display(), keys = values.len(), "memento loaded");
        Ok(Self { path, values: RwLock::new(values), write_lock: tokio::sync::Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory copy with the file's current contents. A missing
    /// or unreadable file keeps what we have.
    fn reload(&self) {
        match read_snapshot(&self.path) {
            Ok(Some(values)) => *self.values.write() = values,
            Ok(None) => {}
            Err(Snapshot::Corrupt(err)) => {
                debug!(path = %self.path.display(), error = %err, "state file corrupt; kept cache");
            }
            Err(Snapshot::Io(err)) => {
                let path = self.path.display();
                debug!(path = %path, error = %err, "state file unreadable; kept cache");
            }
        }
    }

    async fn persist(&self, contents: Vec<u8>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(InfraError::from)?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, contents).await.map_err(InfraError::from)?;
        tokio::fs::rename(&temp, &self.path).await.map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Memento for JsonFileMemento {
    fn get(&self, key: &str) -> Option<Value> {
        self.reload();
        self.values.read().get(key).cloned()
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.reload();
        let contents = {
            let mut values = self.values.write();
            values.insert(key.to_string(), value);
            serde_json::to_vec_pretty(&*values)?
        };
        self.persist(contents).await?;
        debug!(path = %self.path.display(), key, "memento updated");
        Ok(())
    }
}

enum Snapshot {
    Corrupt(serde_json::Error),
    Io(std::io::Error),
}

/// `Ok(None)` when the file does not exist yet.
fn read_snapshot(path: &Path) -> std::result::Result<Option<Map<String, Value>>, Snapshot> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(Snapshot::Corrupt),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Snapshot::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let memento = JsonFileMemento::open(&path).unwrap();
        assert_eq!(memento.get("msalMigration"), None);
        memento.update("msalMigration", json!(true)).await.unwrap();
        memento.update("lastRemoval:a:b", json!("2026-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(memento.get("msalMigration"), Some(json!(true)));

        let reopened = JsonFileMemento::open(&path).unwrap();
        assert_eq!(reopened.get("msalMigration"), Some(json!(true)));
        assert_eq!(reopened.get("lastRemoval:a:b"), Some(json!("2026-01-01T00:00:00Z")));
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    /// Validates two handles on one file, as two processes would hold.
    ///
    /// Assertions:
    /// - a marker written through one handle is visible through the other
    /// - an update through the second handle keeps the first handle's key
    /// - the first handle then sees the second handle's key
    #[tokio::test]
    async fn test_handles_sharing_a_file_see_each_others_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let first = JsonFileMemento::open(&path).unwrap();
        let second = JsonFileMemento::open(&path).unwrap();

        first.update("lastRemoval:c:a", json!("2026-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(second.get("lastRemoval:c:a"), Some(json!("2026-01-01T00:00:00Z")));

        second.update("msalMigration", json!(true)).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            on_disk,
            json!({ "lastRemoval:c:a": "2026-01-01T00:00:00Z", "msalMigration": true })
        );
        assert_eq!(first.get("msalMigration"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty_and_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let memento = JsonFileMemento::open(&path).unwrap();
        assert_eq!(memento.get("anything"), None);

        memento.update("k", json!(1)).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk, json!({ "k": 1 }));
    }
}
