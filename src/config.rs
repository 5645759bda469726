use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Store file; defaults to `<data_dir>/salamene-storage/store.json`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// When unset the network is assumed reachable.
    #[serde(default)]
    pub connectivity_probe_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::NotFound(path.as_ref().display().to_string()))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given or the default file if it exists, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_dir().ok().map(|dir| dir.join("config.toml")),
        };

        let mut config = match file {
            Some(f) if f.exists() || path.is_some() => Self::load(f)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.sync.api_base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.sync.api_base_url.clone()))?;

        if let Some(probe) = &self.sync.connectivity_probe_url {
            url::Url::parse(probe).map_err(|_| ConfigError::InvalidUrl(probe.clone()))?;
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(ConfigError::Config("Request timeout must be greater than 0".to_string()));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SALAMENE_STORE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(url) = std::env::var("SALAMENE_API_BASE_URL") {
            self.sync.api_base_url = url;
        }

        if let Ok(level) = std::env::var("SALAMENE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("store.json")),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("salamene-storage"))
            .ok_or_else(|| ConfigError::Config("Could not determine config directory".to_string()))
    }

    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("salamene-storage"))
            .ok_or_else(|| ConfigError::Config("Could not determine data directory".to_string()))
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            connectivity_probe_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
            json_format: false,
        }
    }
}

fn default_api_base_url() -> String { "http://localhost:3000/api/".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "logs/salamene-storage.log".to_string() }
