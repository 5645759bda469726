use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Durable string-keyed storage shared by the cache, preferences and queue.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value, replacing any existing one
    async fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// Remove a single key (missing keys are not an error)
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Remove several keys in one operation
    async fn multi_remove(&self, keys: &[String]) -> Result<()>;

    /// List every key currently stored
    async fn get_all_keys(&self) -> Result<Vec<String>>;
}

/// In-process store for tests, benchmarks and ephemeral sessions.
///
/// Reads and writes can be made to fail on demand to exercise the
/// degrade-to-miss paths of the managers built on top of it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<RwLock<BTreeMap<String, String>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Copy of the raw contents, bypassing fault injection.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.items.read().clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("simulated read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_read()?;
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.check_write()?;
        self.items.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.check_write()?;
        self.items.write().remove(key);
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<()> {
        self.check_write()?;
        let mut items = self.items.write();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        self.check_read()?;
        Ok(self.items.read().keys().cloned().collect())
    }
}
