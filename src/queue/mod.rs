//! Durable FIFO of side-effecting actions awaiting connectivity.
//!
//! Items are retried on each drain until they succeed or reach
//! [`MAX_RETRIES`], at which point they are dropped.

pub mod executor;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, OFFLINE_QUEUE_KEY};

pub use executor::{HttpActionExecutor, HttpConnectivity};

/// Failed attempts after which an item is dropped.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Analytics,
    ApiCall,
    UserAction,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Analytics => "analytics",
            ActionType::ApiCall => "api_call",
            ActionType::UserAction => "user_action",
        })
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analytics" => Ok(ActionType::Analytics),
            "api_call" => Ok(ActionType::ApiCall),
            "user_action" => Ok(ActionType::UserAction),
            other => Err(Error::Invalid(format!("Unknown action type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(Error::Invalid(format!("Unknown HTTP method: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
    pub retries: u32,
}

/// An action to enqueue; id, timestamp and retry count are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub action_type: ActionType,
    pub endpoint: String,
    pub method: HttpMethod,
    pub data: Option<serde_json::Value>,
}

impl NewQueueItem {
    pub fn new(action_type: ActionType, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            action_type,
            endpoint: endpoint.into(),
            method,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Reports whether the network is reachable right now.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Performs one queued action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, item: &OfflineQueueItem) -> Result<()>;
}

/// Connectivity flag set by the host (e.g. from OS network events).
#[derive(Debug, Clone)]
pub struct StaticConnectivity {
    connected: Arc<AtomicBool>,
}

impl StaticConnectivity {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Outcome of one drain of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub offline: bool,
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
}

pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            store,
            clock,
            connectivity,
            lock: Mutex::new(()),
        }
    }

    fn generate_id(now: i64) -> String {
        let suffix = Alphanumeric.sample_string(&mut rand::thread_rng(), 9);
        format!("{}{}", now, suffix.to_ascii_lowercase())
    }

    /// Append an action. Returns the stored item, or `None` if it could not be persisted.
    pub async fn add_to_offline_queue(&self, item: NewQueueItem) -> Option<OfflineQueueItem> {
        let now = self.clock.now_millis();
        let queued = OfflineQueueItem {
            id: Self::generate_id(now),
            action_type: item.action_type,
            endpoint: item.endpoint,
            method: item.method,
            data: item.data,
            timestamp: now,
            retries: 0,
        };

        let _guard = self.lock.lock().await;
        let result = async {
            let mut queue = self.load().await?;
            queue.push(queued.clone());
            self.save(&queue).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!("Queued {} {} {}", queued.action_type, queued.method, queued.endpoint);
                Some(queued)
            }
            Err(e) => {
                tracing::error!("Failed to add to offline queue: {}", e);
                None
            }
        }
    }

    /// Pending items, oldest first.
    pub async fn get_offline_queue(&self) -> Vec<OfflineQueueItem> {
        self.load().await.unwrap_or_else(|e| {
            tracing::error!("Failed to get offline queue: {}", e);
            Vec::new()
        })
    }

    pub async fn len(&self) -> usize {
        self.get_offline_queue().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn remove_from_offline_queue(&self, id: &str) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.remove_locked(id).await {
            tracing::error!("Failed to remove '{}' from offline queue: {}", id, e);
        }
    }

    /// Hold off every queue mutation until the guard is dropped.
    pub(crate) async fn lock_namespace(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Discard every pending item.
    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        match self.store.remove_item(OFFLINE_QUEUE_KEY).await {
            Ok(()) => tracing::info!("Offline queue cleared"),
            Err(e) => tracing::error!("Failed to clear offline queue: {}", e),
        }
    }

    /// Replay queued actions through `executor` if connected.
    ///
    /// Works on a snapshot taken at the start; items added meanwhile wait
    /// for the next call. Failed items have their retry count persisted and
    /// are dropped once it reaches [`MAX_RETRIES`].
    pub async fn process_offline_queue(&self, executor: &dyn ActionExecutor) -> ProcessReport {
        let mut report = ProcessReport::default();

        if !self.connectivity.is_connected().await {
            tracing::debug!("Offline, skipping queue processing");
            report.offline = true;
            return report;
        }

        let snapshot = match self.load().await {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!("Failed to process offline queue: {}", e);
                return report;
            }
        };
        if snapshot.is_empty() {
            return report;
        }

        tracing::info!("Processing {} offline queue items", snapshot.len());

        for mut item in snapshot {
            report.attempted += 1;

            match executor.execute(&item).await {
                Ok(()) => {
                    self.remove_from_offline_queue(&item.id).await;
                    report.succeeded += 1;
                    tracing::debug!("Processed offline item: {}", item.action_type);
                }
                Err(e) => {
                    item.retries += 1;
                    if item.retries >= MAX_RETRIES {
                        self.remove_from_offline_queue(&item.id).await;
                        report.dropped += 1;
                        tracing::warn!(
                            "Removed offline item {} after {} failed attempts: {}",
                            item.action_type,
                            item.retries,
                            e
                        );
                    } else {
                        self.record_retry(&item.id, item.retries).await;
                        report.retried += 1;
                        tracing::debug!("Offline item {} failed (attempt {}): {}", item.id, item.retries, e);
                    }
                }
            }
        }

        tracing::info!(
            "Offline queue run finished: {} succeeded, {} retried, {} dropped",
            report.succeeded,
            report.retried,
            report.dropped
        );
        report
    }

    async fn record_retry(&self, id: &str, retries: u32) {
        let _guard = self.lock.lock().await;
        let result = async {
            let mut queue = self.load().await?;
            if let Some(stored) = queue.iter_mut().find(|i| i.id == id) {
                stored.retries = retries;
                self.save(&queue).await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to update retries for '{}': {}", id, e);
        }
    }

    async fn remove_locked(&self, id: &str) -> Result<()> {
        let mut queue = self.load().await?;
        let before = queue.len();
        queue.retain(|item| item.id != id);
        if queue.len() != before {
            self.save(&queue).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<OfflineQueueItem>> {
        let Some(raw) = self.store.get_item(OFFLINE_QUEUE_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(queue) => Ok(queue),
            Err(e) => {
                tracing::warn!("Offline queue is unreadable, treating as empty: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, queue: &[OfflineQueueItem]) -> Result<()> {
        let json = serde_json::to_string(queue)?;
        self.store.set_item(OFFLINE_QUEUE_KEY, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    /// Records every attempted id and fails the ones listed.
    #[derive(Default)]
    struct ScriptedExecutor {
        fail_all: bool,
        fail_endpoints: Vec<String>,
        seen: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn execute(&self, item: &OfflineQueueItem) -> Result<()> {
            self.seen.lock().push(item.endpoint.clone());
            if self.fail_all || self.fail_endpoints.contains(&item.endpoint) {
                return Err(Error::Network("unreachable".to_string()));
            }
            Ok(())
        }
    }

    fn setup(connected: bool) -> (OfflineQueue, MemoryStore, StaticConnectivity) {
        let store = MemoryStore::new();
        let connectivity = StaticConnectivity::new(connected);
        let queue = OfflineQueue::new(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            Arc::new(connectivity.clone()),
        );
        (queue, store, connectivity)
    }

    #[tokio::test]
    async fn test_add_assigns_id_timestamp_and_retries() {
        let (queue, _, _) = setup(true);

        let item = queue
            .add_to_offline_queue(
                NewQueueItem::new(ActionType::Analytics, HttpMethod::Post, "/events")
                    .with_data(json!({"event": "open"})),
            )
            .await
            .unwrap();

        assert!(item.id.starts_with("1700000000000"));
        assert_eq!(item.id.len(), 13 + 9);
        assert_eq!(item.retries, 0);
        assert_eq!(queue.get_offline_queue().await, vec![item]);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (queue, _, _) = setup(true);
        let a = queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Get, "/a"))
            .await
            .unwrap();
        let b = queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Get, "/a"))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_wire_format() {
        let (queue, store, _) = setup(true);
        queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::UserAction, HttpMethod::Delete, "/fav/leo"))
            .await;

        let raw = store.snapshot().get(OFFLINE_QUEUE_KEY).cloned().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["type"], "user_action");
        assert_eq!(value[0]["method"], "DELETE");
        assert!(value[0].get("data").is_none());
    }

    #[tokio::test]
    async fn test_success_removes_in_fifo_order() {
        let (queue, _, _) = setup(true);
        for endpoint in ["/1", "/2", "/3"] {
            queue
                .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Post, endpoint))
                .await;
        }

        let executor = ScriptedExecutor {
            fail_endpoints: vec!["/2".to_string()],
            ..Default::default()
        };
        let report = queue.process_offline_queue(&executor).await;

        assert_eq!(*executor.seen.lock(), vec!["/1", "/2", "/3"]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retried, 1);

        let remaining = queue.get_offline_queue().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "/2");
        assert_eq!(remaining[0].retries, 1);
    }

    #[tokio::test]
    async fn test_items_dropped_after_max_retries() {
        let (queue, _, _) = setup(true);
        queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::Analytics, HttpMethod::Post, "/e"))
            .await;
        let executor = ScriptedExecutor {
            fail_all: true,
            ..Default::default()
        };

        for expected in 1..MAX_RETRIES {
            queue.process_offline_queue(&executor).await;
            assert_eq!(queue.get_offline_queue().await[0].retries, expected);
        }

        let report = queue.process_offline_queue(&executor).await;
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_is_noop() {
        let (queue, store, connectivity) = setup(false);
        queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Put, "/x"))
            .await;
        let before = store.snapshot();

        let executor = ScriptedExecutor::default();
        let report = queue.process_offline_queue(&executor).await;

        assert!(report.offline);
        assert!(executor.seen.lock().is_empty());
        assert_eq!(store.snapshot(), before);

        connectivity.set_connected(true);
        assert_eq!(queue.process_offline_queue(&executor).await.succeeded, 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (queue, _, _) = setup(true);
        let a = queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Get, "/a"))
            .await
            .unwrap();
        queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Get, "/b"))
            .await;

        queue.remove_from_offline_queue(&a.id).await;
        assert_eq!(queue.len().await, 1);

        queue.clear().await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_queue_reads_as_empty() {
        let (queue, store, _) = setup(true);
        store.set_item(OFFLINE_QUEUE_KEY, "[{".to_string()).await.unwrap();

        assert!(queue.get_offline_queue().await.is_empty());

        queue
            .add_to_offline_queue(NewQueueItem::new(ActionType::ApiCall, HttpMethod::Get, "/fresh"))
            .await;
        assert_eq!(queue.len().await, 1);
    }
}
