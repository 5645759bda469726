//! Diagnostics, logout clearing and backup/restore of everything under the
//! root namespace.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::preferences::PreferencesManager;
use crate::queue::OfflineQueue;
use crate::storage::{CacheManager, KeyValueStore, ROOT_PREFIX, USER_PREFS_KEY};

/// Envelope version written by [`Maintenance::export_user_data`].
pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub cache_size: u64,
    pub queue_size: usize,
    pub total_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    pub timestamp: i64,
    pub data: BTreeMap<String, String>,
}

pub struct Maintenance {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cache: CacheManager,
    preferences: Arc<PreferencesManager>,
    queue: Arc<OfflineQueue>,
}

impl Maintenance {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        cache: CacheManager,
        preferences: Arc<PreferencesManager>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            store,
            clock,
            cache,
            preferences,
            queue,
        }
    }

    async fn namespaced_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(ROOT_PREFIX))
            .collect())
    }

    pub async fn get_storage_stats(&self) -> StorageStats {
        let total_items = match self.namespaced_keys().await {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::error!("Failed to get storage stats: {}", e);
                return StorageStats::default();
            }
        };

        StorageStats {
            cache_size: self.cache.get_cache_size().await,
            queue_size: self.queue.len().await,
            total_items,
        }
    }

    /// Remove every namespaced key except the preferences record.
    ///
    /// Waits for any in-flight queue mutation so a pending append cannot
    /// write the old list back afterwards.
    pub async fn clear_user_data(&self) {
        let _queue_guard = self.queue.lock_namespace().await;
        if let Err(e) = self.try_clear_user_data().await {
            tracing::error!("Failed to clear user data: {}", e);
        }
    }

    async fn try_clear_user_data(&self) -> Result<()> {
        let keys: Vec<String> = self
            .namespaced_keys()
            .await?
            .into_iter()
            .filter(|key| key != USER_PREFS_KEY)
            .collect();

        self.store.multi_remove(&keys).await?;
        tracing::info!("Cleared {} user data keys", keys.len());
        Ok(())
    }

    /// Serialized snapshot of all namespaced keys, or an empty string on failure.
    pub async fn export_user_data(&self) -> String {
        match self.try_export().await {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to export user data: {}", e);
                String::new()
            }
        }
    }

    async fn try_export(&self) -> Result<String> {
        let mut data = BTreeMap::new();
        for key in self.namespaced_keys().await? {
            if let Some(value) = self.store.get_item(&key).await? {
                data.insert(key, value);
            }
        }

        let envelope = ExportEnvelope {
            version: EXPORT_VERSION.to_string(),
            timestamp: self.clock.now_millis(),
            data,
        };
        tracing::info!("Exported {} keys", envelope.data.len());
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Validate `serialized`, clear current user data and write the backup verbatim.
    ///
    /// Nothing is cleared unless validation passes. Returns `false` on any failure.
    pub async fn import_user_data(&self, serialized: &str) -> bool {
        let entries = match parse_import(serialized) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to import user data: {}", e);
                return false;
            }
        };

        let _prefs_guard = self.preferences.lock_namespace().await;
        let _queue_guard = self.queue.lock_namespace().await;
        let result = async {
            self.try_clear_user_data().await?;
            for (key, value) in &entries {
                self.store.set_item(key, value.clone()).await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!("Imported {} keys", entries.len());
                true
            }
            Err(e) => {
                tracing::error!("Failed to import user data: {}", e);
                false
            }
        }
    }
}

/// Pull importable key/value pairs out of an export envelope.
///
/// Non-string values and keys outside the root namespace are skipped.
fn parse_import(serialized: &str) -> Result<Vec<(String, String)>> {
    let value: serde_json::Value = serde_json::from_str(serialized)
        .map_err(|e| Error::InvalidImport(e.to_string()))?;

    if let Some(version) = value.get("version") {
        if version.as_str() != Some(EXPORT_VERSION) {
            return Err(Error::InvalidImport(format!("Unsupported version {}", version)));
        }
    }

    let data = value
        .get("data")
        .and_then(|d| d.as_object())
        .ok_or_else(|| Error::InvalidImport("Invalid data format".to_string()))?;

    let mut entries = Vec::with_capacity(data.len());
    for (key, value) in data {
        match value.as_str() {
            Some(raw) if key.starts_with(ROOT_PREFIX) => entries.push((key.clone(), raw.to_string())),
            Some(_) => tracing::warn!("Skipping foreign key '{}' in import", key),
            None => tracing::warn!("Skipping non-string value for '{}' in import", key),
        }
    }
    Ok(entries)
}
