pub mod cache;
pub mod persistent;
pub mod traits;

pub use cache::{CacheCategory, CacheEntry, CacheManager, DEFAULT_CACHE_DURATION};
pub use persistent::FileStore;
pub use traits::{KeyValueStore, MemoryStore};

/// Every key owned by this crate starts with this prefix.
pub const ROOT_PREFIX: &str = "salamene_";

/// Prefix for TTL-stamped cache entries.
pub const CACHE_PREFIX: &str = "salamene_cache_";

/// Single key holding the user preferences record.
pub const USER_PREFS_KEY: &str = "salamene_user_prefs";

/// Single key holding the offline action queue.
pub const OFFLINE_QUEUE_KEY: &str = "salamene_offline_queue";
