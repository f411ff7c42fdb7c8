use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use crate::errors::StoreError;

/// Durable string storage keyed by name.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `None` when nothing is stored under `key`.
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per key under a directory. Writes go to a temp file first
/// and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path.display(), e)),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(self.dir.display(), e))?;

        let final_path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp_path, value)
            .await
            .map_err(|e| StoreError::io(tmp_path.display(), e))?;

        if let Err(rename_err) = fs::rename(&tmp_path, &final_path).await {
            // Some platforms refuse to rename over an existing file.
            if fs::try_exists(&final_path).await.unwrap_or(false) {
                fs::remove_file(&final_path)
                    .await
                    .map_err(|e| StoreError::io(final_path.display(), e))?;
                fs::rename(&tmp_path, &final_path)
                    .await
                    .map_err(|e| StoreError::io(final_path.display(), e))?;
            } else {
                return Err(StoreError::io(final_path.display(), rename_err));
            }
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path.display(), e)),
        }
    }
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate `key`, e.g. with a corrupted payload.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(key.into(), value.into());
        }
        store
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Io {
            path: "memory".to_string(),
            message: "store lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
