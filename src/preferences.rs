//! User settings record stored under a single key.
//!
//! Reads always yield a fully populated record: missing fields are filled
//! from [`UserPreferences::default`], a field holding a value of the wrong
//! shape falls back to its default on its own, and unknown fields are ignored.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, USER_PREFS_KEY};
use crate::zodiac::ZodiacSign;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Dark => f.write_str("dark"),
            Theme::Light => f.write_str("light"),
        }
    }
}

impl FromStr for Theme {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(Error::Invalid(format!("Unknown theme: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub theme: Theme,
    pub notifications_enabled: bool,
    /// `HH:MM`
    pub daily_reminder_time: String,
    pub favorite_signs: BTreeSet<ZodiacSign>,
    pub last_read_horoscope: String,
    pub premium_trial_used: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            notifications_enabled: true,
            daily_reminder_time: "09:00".to_string(),
            favorite_signs: BTreeSet::new(),
            last_read_horoscope: String::new(),
            premium_trial_used: false,
        }
    }
}

impl UserPreferences {
    /// Parse a stored record, overlaying each valid field onto the defaults.
    ///
    /// Only a record that is not a JSON object is rejected as a whole.
    pub fn from_stored(raw: &str) -> Result<Self> {
        let stored: Map<String, Value> = serde_json::from_str(raw)?;
        let mut merged = match serde_json::to_value(Self::default())? {
            Value::Object(fields) => fields,
            _ => return Ok(Self::default()),
        };

        for (field, value) in stored {
            if !merged.contains_key(&field) {
                continue;
            }
            let mut candidate = merged.clone();
            candidate.insert(field.clone(), value);
            if serde_json::from_value::<Self>(Value::Object(candidate.clone())).is_ok() {
                merged = candidate;
            } else {
                tracing::warn!("Ignoring invalid stored preference '{}'", field);
            }
        }

        Ok(serde_json::from_value(Value::Object(merged))?)
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    pub theme: Option<Theme>,
    pub notifications_enabled: Option<bool>,
    pub daily_reminder_time: Option<String>,
    pub favorite_signs: Option<BTreeSet<ZodiacSign>>,
    pub last_read_horoscope: Option<String>,
    pub premium_trial_used: Option<bool>,
}

impl PreferencesUpdate {
    pub fn theme(theme: Theme) -> Self {
        Self {
            theme: Some(theme),
            ..Default::default()
        }
    }

    /// Shallow-override `current` with every field set in this update.
    pub fn apply(self, current: UserPreferences) -> UserPreferences {
        UserPreferences {
            theme: self.theme.unwrap_or(current.theme),
            notifications_enabled: self
                .notifications_enabled
                .unwrap_or(current.notifications_enabled),
            daily_reminder_time: self
                .daily_reminder_time
                .unwrap_or(current.daily_reminder_time),
            favorite_signs: self.favorite_signs.unwrap_or(current.favorite_signs),
            last_read_horoscope: self
                .last_read_horoscope
                .unwrap_or(current.last_read_horoscope),
            premium_trial_used: self.premium_trial_used.unwrap_or(current.premium_trial_used),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(time) = &self.daily_reminder_time {
            chrono::NaiveTime::parse_from_str(time, "%H:%M")
                .map_err(|_| Error::Invalid(format!("Reminder time must be HH:MM, got '{}'", time)))?;
        }
        Ok(())
    }
}

/// Merge-on-write settings store.
///
/// Updates are read-modify-write on one JSON record and are serialized
/// through an internal lock so concurrent callers never lose a delta.
pub struct PreferencesManager {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl PreferencesManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Hold off every preferences update until the guard is dropped.
    pub(crate) async fn lock_namespace(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Current preferences. The first call on an empty store persists the defaults.
    pub async fn get_user_preferences(&self) -> UserPreferences {
        let _guard = self.lock.lock().await;
        match self.load_or_init().await {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::error!("Failed to get user preferences: {}", e);
                UserPreferences::default()
            }
        }
    }

    /// Merge `update` over the stored record and persist the result.
    ///
    /// If the current record cannot be read the update is dropped rather
    /// than merged over defaults.
    pub async fn set_user_preferences(&self, update: PreferencesUpdate) {
        let _guard = self.lock.lock().await;
        let result = async {
            let current = self.load_or_init().await?;
            let merged = update.apply(current);
            self.write(&merged).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to set user preferences: {}", e);
        }
    }

    /// Remove the stored record; the next read starts from defaults again.
    pub async fn reset_preferences(&self) {
        let _guard = self.lock.lock().await;
        match self.store.remove_item(USER_PREFS_KEY).await {
            Ok(()) => tracing::info!("User preferences reset"),
            Err(e) => tracing::error!("Failed to reset user preferences: {}", e),
        }
    }

    async fn load_or_init(&self) -> Result<UserPreferences> {
        if let Some(prefs) = self.read_stored().await? {
            return Ok(prefs);
        }

        let defaults = UserPreferences::default();
        self.write(&defaults).await?;
        tracing::debug!("Initialized default user preferences");
        Ok(defaults)
    }

    async fn read_stored(&self) -> Result<Option<UserPreferences>> {
        let Some(raw) = self.store.get_item(USER_PREFS_KEY).await? else {
            return Ok(None);
        };

        match UserPreferences::from_stored(&raw) {
            Ok(prefs) => Ok(Some(prefs)),
            Err(e) => {
                tracing::warn!("Stored user preferences are unreadable, using defaults: {}", e);
                Ok(None)
            }
        }
    }

    async fn write(&self, prefs: &UserPreferences) -> Result<()> {
        let json = serde_json::to_string(prefs)?;
        self.store.set_item(USER_PREFS_KEY, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn setup() -> (PreferencesManager, MemoryStore) {
        let store = MemoryStore::new();
        (PreferencesManager::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_first_read_persists_defaults() {
        let (prefs, store) = setup();

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded, UserPreferences::default());

        let raw = store.snapshot().get(USER_PREFS_KEY).cloned().unwrap();
        let persisted: UserPreferences = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, UserPreferences::default());
    }

    #[tokio::test]
    async fn test_partial_record_is_backfilled() {
        let (prefs, store) = setup();
        store
            .set_item(USER_PREFS_KEY, r#"{"theme":"light","legacy_flag":1}"#.to_string())
            .await
            .unwrap();

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded.theme, Theme::Light);
        assert_eq!(loaded.daily_reminder_time, "09:00");
        assert!(loaded.notifications_enabled);
    }

    #[tokio::test]
    async fn test_bad_field_resets_only_that_field() {
        let (prefs, store) = setup();
        store
            .set_item(
                USER_PREFS_KEY,
                r#"{"theme":"light","premium_trial_used":true,"last_read_horoscope":null,"favorite_signs":["leo","ophiuchus"]}"#
                    .to_string(),
            )
            .await
            .unwrap();

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded.theme, Theme::Light);
        assert!(loaded.premium_trial_used);
        assert_eq!(loaded.last_read_horoscope, "");
        assert!(loaded.favorite_signs.is_empty());

        prefs
            .set_user_preferences(PreferencesUpdate {
                notifications_enabled: Some(false),
                ..Default::default()
            })
            .await;
        let raw = store.snapshot().get(USER_PREFS_KEY).cloned().unwrap();
        let persisted: UserPreferences = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.theme, Theme::Light);
        assert!(persisted.premium_trial_used);
        assert!(!persisted.notifications_enabled);
    }

    #[tokio::test]
    async fn test_non_object_record_is_replaced() {
        let (prefs, store) = setup();
        store.set_item(USER_PREFS_KEY, "[1,2]".to_string()).await.unwrap();

        assert_eq!(prefs.get_user_preferences().await, UserPreferences::default());
        let raw = store.snapshot().get(USER_PREFS_KEY).cloned().unwrap();
        assert_eq!(serde_json::from_str::<UserPreferences>(&raw).unwrap(), UserPreferences::default());
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let (prefs, _) = setup();

        prefs
            .set_user_preferences(PreferencesUpdate {
                favorite_signs: Some([ZodiacSign::Leo, ZodiacSign::Aries].into_iter().collect()),
                ..Default::default()
            })
            .await;
        prefs.set_user_preferences(PreferencesUpdate::theme(Theme::Light)).await;

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded.theme, Theme::Light);
        assert_eq!(loaded.favorite_signs.len(), 2);
        assert_eq!(loaded.daily_reminder_time, "09:00");
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let (prefs, _) = setup();
        let prefs = Arc::new(prefs);

        let a = {
            let prefs = prefs.clone();
            tokio::spawn(async move {
                prefs.set_user_preferences(PreferencesUpdate::theme(Theme::Light)).await
            })
        };
        let b = {
            let prefs = prefs.clone();
            tokio::spawn(async move {
                prefs
                    .set_user_preferences(PreferencesUpdate {
                        premium_trial_used: Some(true),
                        ..Default::default()
                    })
                    .await
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded.theme, Theme::Light);
        assert!(loaded.premium_trial_used);
    }

    #[tokio::test]
    async fn test_read_failure_returns_defaults_and_skips_write() {
        let (prefs, store) = setup();
        prefs.set_user_preferences(PreferencesUpdate::theme(Theme::Light)).await;

        store.set_fail_reads(true);
        assert_eq!(prefs.get_user_preferences().await, UserPreferences::default());
        prefs
            .set_user_preferences(PreferencesUpdate {
                notifications_enabled: Some(false),
                ..Default::default()
            })
            .await;
        store.set_fail_reads(false);

        let loaded = prefs.get_user_preferences().await;
        assert_eq!(loaded.theme, Theme::Light);
        assert!(loaded.notifications_enabled);
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let (prefs, store) = setup();
        prefs.set_user_preferences(PreferencesUpdate::theme(Theme::Light)).await;

        prefs.reset_preferences().await;
        assert!(!store.snapshot().contains_key(USER_PREFS_KEY));
        assert_eq!(prefs.get_user_preferences().await.theme, Theme::Dark);
    }

    #[test]
    fn test_reminder_time_validation() {
        let ok = PreferencesUpdate {
            daily_reminder_time: Some("21:30".to_string()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = PreferencesUpdate {
            daily_reminder_time: Some("9pm".to_string()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
