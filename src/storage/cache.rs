use std::sync::Arc;
use std::time::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::traits::KeyValueStore;
use crate::storage::CACHE_PREFIX;
use crate::zodiac::{horoscope_key, Timeframe, ZodiacSign};

/// Fallback lifetime for keys that match no category.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(60 * 60);

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Cache entry with expiration tracking, stored as JSON under `CACHE_PREFIX + key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, ms since epoch
    pub timestamp: i64,
    /// `timestamp + duration`
    pub expires: i64,
    pub key: String,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, data: T, now: i64, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: now,
            expires: now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            key: key.into(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.expires.saturating_sub(self.timestamp).max(0) as u64)
    }
}

/// Content categories with their default lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    HoroscopeDaily,
    HoroscopeWeekly,
    HoroscopeMonthly,
    Compatibility,
    Traits,
    UserProfile,
    Pricing,
    Analytics,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 8] = [
        CacheCategory::HoroscopeDaily,
        CacheCategory::HoroscopeWeekly,
        CacheCategory::HoroscopeMonthly,
        CacheCategory::Compatibility,
        CacheCategory::Traits,
        CacheCategory::UserProfile,
        CacheCategory::Pricing,
        CacheCategory::Analytics,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CacheCategory::HoroscopeDaily => "horoscope_daily",
            CacheCategory::HoroscopeWeekly => "horoscope_weekly",
            CacheCategory::HoroscopeMonthly => "horoscope_monthly",
            CacheCategory::Compatibility => "compatibility",
            CacheCategory::Traits => "traits",
            CacheCategory::UserProfile => "user_profile",
            CacheCategory::Pricing => "pricing",
            CacheCategory::Analytics => "analytics",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            CacheCategory::HoroscopeDaily => Duration::from_secs(DAY),
            CacheCategory::HoroscopeWeekly => Duration::from_secs(7 * DAY),
            CacheCategory::HoroscopeMonthly => Duration::from_secs(30 * DAY),
            CacheCategory::Compatibility => Duration::from_secs(7 * DAY),
            CacheCategory::Traits => Duration::from_secs(30 * DAY),
            CacheCategory::UserProfile => Duration::from_secs(HOUR),
            CacheCategory::Pricing => Duration::from_secs(HOUR),
            CacheCategory::Analytics => Duration::from_secs(5 * 60),
        }
    }

    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::Daily => CacheCategory::HoroscopeDaily,
            Timeframe::Weekly => CacheCategory::HoroscopeWeekly,
            Timeframe::Monthly => CacheCategory::HoroscopeMonthly,
        }
    }

    /// Resolve the category of a logical key.
    ///
    /// An exact name wins; otherwise the longest category name followed by
    /// `_` at the start of the key, so `horoscope_daily_leo` is daily.
    pub fn for_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|category| {
                let name = category.name();
                key == name
                    || (key.len() > name.len()
                        && key.starts_with(name)
                        && key.as_bytes()[name.len()] == b'_')
            })
            .max_by_key(|category| category.name().len())
    }
}

/// TTL cache over the shared key-value store.
///
/// Every operation is a store round trip; nothing is mirrored in memory.
/// Store failures are logged and degrade to a miss or a no-op.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Lifetime used for `key`: a non-zero custom duration, then the key's category, then the default.
    pub fn duration_for(key: &str, custom: Option<Duration>) -> Duration {
        custom
            .filter(|d| !d.is_zero())
            .or_else(|| CacheCategory::for_key(key).map(|c| c.duration()))
            .unwrap_or(DEFAULT_CACHE_DURATION)
    }

    fn storage_key(key: &str) -> String {
        format!("{}{}", CACHE_PREFIX, key)
    }

    /// Store data with automatic expiration. Failures are logged, never returned.
    pub async fn set_cache<T: Serialize>(&self, key: &str, data: &T, custom: Option<Duration>) {
        let duration = Self::duration_for(key, custom);
        let entry = CacheEntry::new(key, data, self.clock.now_millis(), duration);

        let result = match serde_json::to_string(&entry) {
            Ok(json) => self.store.set_item(&Self::storage_key(key), json).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => tracing::debug!("Cached '{}' for {:?}", key, duration),
            Err(e) => tracing::error!("Failed to set cache '{}': {}", key, e),
        }
    }

    /// Retrieve data if present and not expired. Expired entries are deleted.
    pub async fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = match self.read_entry::<T>(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to get cache '{}': {}", key, e);
                return None;
            }
        };

        if entry.is_expired(self.clock.now_millis()) {
            tracing::debug!("Cache entry '{}' expired", key);
            self.remove_cache(key).await;
            return None;
        }

        Some(entry.data)
    }

    /// Raw entry regardless of expiry, for diagnostics.
    pub async fn peek_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        match self.read_entry(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to read cache entry '{}': {}", key, e);
                None
            }
        }
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let Some(raw) = self.store.get_item(&Self::storage_key(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    pub async fn remove_cache(&self, key: &str) {
        if let Err(e) = self.store.remove_item(&Self::storage_key(key)).await {
            tracing::error!("Failed to remove cache '{}': {}", key, e);
        }
    }

    /// Remove every entry under the cache prefix.
    pub async fn clear_cache(&self) {
        let result = async {
            let keys = self.cache_keys().await?;
            let count = keys.len();
            self.store.multi_remove(&keys).await?;
            Ok::<usize, crate::error::Error>(count)
        }
        .await;

        match result {
            Ok(count) => tracing::info!("Cleared {} cache entries", count),
            Err(e) => tracing::error!("Failed to clear cache: {}", e),
        }
    }

    /// Total byte length of all stored cache values.
    pub async fn get_cache_size(&self) -> u64 {
        let result = async {
            let mut total = 0u64;
            for key in self.cache_keys().await? {
                if let Some(value) = self.store.get_item(&key).await? {
                    total += value.len() as u64;
                }
            }
            Ok::<u64, crate::error::Error>(total)
        }
        .await;

        result.unwrap_or_else(|e| {
            tracing::error!("Failed to calculate cache size: {}", e);
            0
        })
    }

    async fn cache_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(CACHE_PREFIX))
            .collect())
    }

    pub async fn store_horoscope<T: Serialize>(&self, sign: ZodiacSign, timeframe: Timeframe, data: &T) {
        let duration = CacheCategory::for_timeframe(timeframe).duration();
        self.set_cache(&horoscope_key(sign, timeframe), data, Some(duration)).await;
    }

    pub async fn get_horoscope<T: DeserializeOwned>(&self, sign: ZodiacSign, timeframe: Timeframe) -> Option<T> {
        self.get_cache(&horoscope_key(sign, timeframe)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::traits::MemoryStore;
    use serde_json::json;

    const START: i64 = 1_700_000_000_000;

    fn setup() -> (CacheManager, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(START));
        let cache = CacheManager::new(Arc::new(store.clone()), clock.clone());
        (cache, store, clock)
    }

    #[test]
    fn test_category_lookup() {
        assert_eq!(CacheCategory::for_key("pricing"), Some(CacheCategory::Pricing));
        assert_eq!(
            CacheCategory::for_key("horoscope_daily_leo"),
            Some(CacheCategory::HoroscopeDaily)
        );
        assert_eq!(
            CacheCategory::for_key("compatibility_aries_leo"),
            Some(CacheCategory::Compatibility)
        );
        assert_eq!(CacheCategory::for_key("pricingplans"), None);
        assert_eq!(CacheCategory::for_key("unknown_key"), None);
    }

    #[test]
    fn test_duration_resolution() {
        assert_eq!(
            CacheManager::duration_for("horoscope_weekly_leo", None),
            Duration::from_secs(7 * DAY)
        );
        assert_eq!(CacheManager::duration_for("analytics", None), Duration::from_secs(300));
        assert_eq!(CacheManager::duration_for("whatever", None), DEFAULT_CACHE_DURATION);
        assert_eq!(
            CacheManager::duration_for("traits", Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
        assert_eq!(
            CacheManager::duration_for("traits", Some(Duration::ZERO)),
            Duration::from_secs(30 * DAY)
        );
    }

    #[tokio::test]
    async fn test_set_and_get_within_ttl() {
        let (cache, _, clock) = setup();

        cache.set_cache("pricing", &json!({"usd": 9.99}), Some(Duration::from_millis(1000))).await;
        assert_eq!(cache.get_cache::<serde_json::Value>("pricing").await, Some(json!({"usd": 9.99})));

        clock.advance(Duration::from_millis(1000));
        assert!(cache.get_cache::<serde_json::Value>("pricing").await.is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get_cache::<serde_json::Value>("pricing").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_duration_saturates() {
        let (cache, _, clock) = setup();

        cache.set_cache("pricing", &1u32, Some(Duration::from_millis(u64::MAX))).await;
        assert_eq!(cache.get_cache::<u32>("pricing").await, Some(1));

        let entry = cache.peek_entry::<u32>("pricing").await.unwrap();
        assert_eq!(entry.expires, i64::MAX);

        clock.advance(Duration::from_secs(365 * DAY));
        assert_eq!(cache.get_cache::<u32>("pricing").await, Some(1));
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted() {
        let (cache, store, clock) = setup();

        cache.set_cache("analytics", &42u32, None).await;
        clock.advance(Duration::from_secs(301));

        assert_eq!(cache.get_cache::<u32>("analytics").await, None);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (cache, store, _) = setup();
        store
            .set_item("salamene_cache_traits", "{ broken".to_string())
            .await
            .unwrap();

        assert_eq!(cache.get_cache::<String>("traits").await, None);
        // Left in place until the next write replaces it
        assert!(store.snapshot().contains_key("salamene_cache_traits"));
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_miss() {
        let (cache, store, _) = setup();

        store.set_fail_writes(true);
        cache.set_cache("traits", &"x", None).await;
        store.set_fail_writes(false);
        assert_eq!(cache.get_cache::<String>("traits").await, None);

        cache.set_cache("traits", &"x", None).await;
        store.set_fail_reads(true);
        assert_eq!(cache.get_cache::<String>("traits").await, None);
        assert_eq!(cache.get_cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_clear_cache_only_touches_cache_prefix() {
        let (cache, store, _) = setup();
        store.set_item("salamene_user_prefs", "{}".to_string()).await.unwrap();
        store.set_item("other_app_key", "1".to_string()).await.unwrap();

        cache.set_cache("traits", &"a", None).await;
        cache.set_cache("pricing", &"b", None).await;
        assert!(cache.get_cache_size().await > 0);

        cache.clear_cache().await;

        let keys: Vec<String> = store.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["other_app_key", "salamene_user_prefs"]);
        assert_eq!(cache.get_cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_cache_size_sums_value_bytes() {
        let (cache, store, _) = setup();

        cache.set_cache("traits", &"abc", None).await;
        cache.set_cache("pricing", &vec![1, 2, 3], None).await;

        let expected: u64 = store
            .snapshot()
            .values()
            .map(|v| v.len() as u64)
            .sum();
        assert_eq!(cache.get_cache_size().await, expected);
    }

    #[tokio::test]
    async fn test_horoscope_helpers() {
        let (cache, _, clock) = setup();

        cache
            .store_horoscope(ZodiacSign::Leo, Timeframe::Weekly, &json!({"preview": "Bold week"}))
            .await;

        let entry = cache
            .peek_entry::<serde_json::Value>("horoscope_weekly_leo")
            .await
            .unwrap();
        assert_eq!(entry.ttl(), Duration::from_secs(7 * DAY));

        clock.advance(Duration::from_secs(6 * DAY));
        let reading: Option<serde_json::Value> = cache.get_horoscope(ZodiacSign::Leo, Timeframe::Weekly).await;
        assert_eq!(reading, Some(json!({"preview": "Bold week"})));

        assert!(cache
            .get_horoscope::<serde_json::Value>(ZodiacSign::Leo, Timeframe::Daily)
            .await
            .is_none());
    }
}
