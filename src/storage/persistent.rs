use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::traits::KeyValueStore;

const STORE_FORMAT_VERSION: u32 = 1;

/// On-disk layout of the store file
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    saved_at: i64,
    items: BTreeMap<String, String>,
}

/// Key-value store persisted as a single JSON file.
///
/// The whole map is kept in memory and rewritten on every mutation through
/// a temporary file followed by a rename.
pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!(
                        "Failed to create store directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let items = Self::load(&path).await?;
        tracing::debug!("Opened store {} with {} keys", path.display(), items.len());

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            tracing::debug!("Store file does not exist yet: {}", path.display());
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::Storage(format!("Failed to read store file '{}': {}", path.display(), e))
        })?;

        let file: StoreFile = serde_json::from_str(&content)?;
        if file.version != STORE_FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "Unsupported store format version {} in '{}'",
                file.version,
                path.display()
            )));
        }

        Ok(file.items)
    }

    async fn persist(&self, items: &BTreeMap<String, String>) -> Result<()> {
        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            saved_at: chrono::Utc::now().timestamp_millis(),
            items: items.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_file = self.path.with_extension("tmp");
        fs::write(&temp_file, json).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to write store to '{}': {}",
                temp_file.display(),
                e
            ))
        })?;

        fs::rename(&temp_file, &self.path).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to rename store file '{}' to '{}': {}",
                temp_file.display(),
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut items = self.items.lock().await;
        let previous = items.insert(key.to_string(), value);

        if let Err(e) = self.persist(&items).await {
            // Keep memory consistent with disk
            match previous {
                Some(old) => items.insert(key.to_string(), old),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        if let Some(old) = items.remove(key) {
            if let Err(e) = self.persist(&items).await {
                items.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<()> {
        let mut items = self.items.lock().await;
        let removed: Vec<(String, String)> = keys
            .iter()
            .filter_map(|key| items.remove(key).map(|value| (key.clone(), value)))
            .collect();

        if removed.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.persist(&items).await {
            items.extend(removed);
            return Err(e);
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.items.lock().await.keys().cloned().collect())
    }
}
