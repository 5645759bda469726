use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::preferences::PreferencesManager;
use crate::queue::{Connectivity, HttpConnectivity, OfflineQueue, StaticConnectivity};
use crate::storage::{CacheManager, FileStore, KeyValueStore, MemoryStore};

/// All storage components over one shared store.
///
/// Construct once at startup and hand out references; each component owns a
/// disjoint key namespace.
pub struct StorageService {
    store: Arc<dyn KeyValueStore>,
    cache: CacheManager,
    preferences: Arc<PreferencesManager>,
    queue: Arc<OfflineQueue>,
    maintenance: Maintenance,
}

impl StorageService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let cache = CacheManager::new(store.clone(), clock.clone());
        let preferences = Arc::new(PreferencesManager::new(store.clone()));
        let queue = Arc::new(OfflineQueue::new(store.clone(), clock.clone(), connectivity));
        let maintenance = Maintenance::new(
            store.clone(),
            clock,
            cache.clone(),
            preferences.clone(),
            queue.clone(),
        );

        Self {
            store,
            cache,
            preferences,
            queue,
            maintenance,
        }
    }

    /// Ephemeral service over a [`MemoryStore`], always online.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(StaticConnectivity::new(true)),
        )
    }

    /// Service over the file store named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = FileStore::open(config.store_path()?).await?;
        let timeout = Duration::from_secs(config.sync.request_timeout_secs);

        let connectivity: Arc<dyn Connectivity> = match &config.sync.connectivity_probe_url {
            Some(url) => Arc::new(HttpConnectivity::new(url, timeout)?),
            None => Arc::new(StaticConnectivity::new(true)),
        };

        Ok(Self::new(Arc::new(store), Arc::new(SystemClock), connectivity))
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn preferences(&self) -> &PreferencesManager {
        &self.preferences
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_service_wires_components() {
        let service = StorageService::in_memory();

        service.cache().set_cache("traits", &"bold", None).await;
        assert_eq!(service.cache().get_cache::<String>("traits").await, Some("bold".to_string()));

        let stats = service.maintenance().get_storage_stats().await;
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.queue_size, 0);
    }

    #[tokio::test]
    async fn test_open_uses_configured_path() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.path = Some(temp_dir.path().join("store.json"));

        let service = StorageService::open(&config).await.unwrap();
        service.preferences().get_user_preferences().await;

        assert!(temp_dir.path().join("store.json").exists());
    }
}
