use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{CacheCommand, Cli, PrefsCommand, PrefsSetArgs, QueueCommand};
use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use crate::preferences::PreferencesUpdate;
use crate::queue::{HttpActionExecutor, NewQueueItem};
use crate::service::StorageService;

/// Write the default configuration file
pub async fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_file = get_config_file(config_path)?;

    if config_file.exists() && !force {
        warn!("Configuration file already exists: {}", config_file.display());
        println!("Configuration already exists at {} (use --force to overwrite)", config_file.display());
        return Ok(());
    }

    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_file, create_default_config()?)?;
    info!("Created default configuration: {}", config_file.display());

    println!("✅ Configuration written to {}", config_file.display());
    Ok(())
}

pub async fn stats(service: &StorageService, json: bool) -> Result<()> {
    let stats = service.maintenance().get_storage_stats().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("📊 Storage statistics");
        println!("   Cache size:   {} bytes", stats.cache_size);
        println!("   Queued items: {}", stats.queue_size);
        println!("   Total keys:   {}", stats.total_items);
    }
    Ok(())
}

pub async fn cache(service: &StorageService, command: CacheCommand) -> Result<()> {
    let cache = service.cache();

    match command {
        CacheCommand::Get { key, raw } => {
            let output = if raw {
                cache
                    .peek_entry::<serde_json::Value>(&key)
                    .await
                    .map(|entry| serde_json::to_value(entry))
                    .transpose()?
            } else {
                cache.get_cache::<serde_json::Value>(&key).await
            };

            match output {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => return Err(Error::NotFound(format!("No valid cache entry for '{}'", key))),
            }
        }
        CacheCommand::Set { key, value, ttl_ms } => {
            let data: serde_json::Value = serde_json::from_str(&value)?;
            let ttl = ttl_ms.map(Duration::from_millis);
            cache.set_cache(&key, &data, ttl).await;
            println!("✅ Cached '{}' for {:?}", key, crate::storage::CacheManager::duration_for(&key, ttl));
        }
        CacheCommand::Remove { key } => {
            cache.remove_cache(&key).await;
            println!("✅ Removed '{}'", key);
        }
        CacheCommand::Clear => {
            cache.clear_cache().await;
            println!("✅ Cache cleared");
        }
        CacheCommand::Horoscope { sign, timeframe } => {
            match cache.get_horoscope::<serde_json::Value>(sign, timeframe).await {
                Some(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
                None => {
                    return Err(Error::NotFound(format!("No cached {} horoscope for {}", timeframe, sign)))
                }
            }
        }
    }
    Ok(())
}

pub async fn prefs(service: &StorageService, command: PrefsCommand) -> Result<()> {
    let prefs = service.preferences();

    match command {
        PrefsCommand::Show => {
            let current = prefs.get_user_preferences().await;
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
        PrefsCommand::Set(args) => {
            let update = build_update(args);
            update.validate()?;
            prefs.set_user_preferences(update).await;
            let current = prefs.get_user_preferences().await;
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
        PrefsCommand::Reset => {
            prefs.reset_preferences().await;
            println!("✅ Preferences reset to defaults");
        }
    }
    Ok(())
}

fn build_update(args: PrefsSetArgs) -> PreferencesUpdate {
    PreferencesUpdate {
        theme: args.theme,
        notifications_enabled: args.notifications,
        daily_reminder_time: args.reminder_time,
        favorite_signs: if args.favorites.is_empty() {
            None
        } else {
            Some(args.favorites.into_iter().collect())
        },
        last_read_horoscope: args.last_read,
        premium_trial_used: args.trial_used,
    }
}

pub async fn queue(service: &StorageService, config: &Config, command: QueueCommand) -> Result<()> {
    let queue = service.queue();

    match command {
        QueueCommand::List => {
            let items = queue.get_offline_queue().await;
            if items.is_empty() {
                println!("Offline queue is empty");
            }
            for item in items {
                println!(
                    "{}  {:<11} {:<6} {}  (retries: {})",
                    item.id, item.action_type, item.method, item.endpoint, item.retries
                );
            }
        }
        QueueCommand::Add { action_type, method, endpoint, data } => {
            let mut item = NewQueueItem::new(action_type, method, endpoint);
            if let Some(raw) = data {
                item = item.with_data(serde_json::from_str(&raw)?);
            }
            let queued = queue
                .add_to_offline_queue(item)
                .await
                .ok_or_else(|| Error::Storage("Failed to persist queue item".to_string()))?;
            println!("✅ Queued {}", queued.id);
        }
        QueueCommand::Remove { id } => {
            queue.remove_from_offline_queue(&id).await;
            println!("✅ Removed {}", id);
        }
        QueueCommand::Process => {
            let executor = HttpActionExecutor::new(
                &config.sync.api_base_url,
                Duration::from_secs(config.sync.request_timeout_secs),
            )?;
            let report = queue.process_offline_queue(&executor).await;

            if report.offline {
                println!("📴 Offline, nothing processed");
            } else {
                println!(
                    "🔄 {} attempted: {} succeeded, {} will retry, {} dropped",
                    report.attempted, report.succeeded, report.retried, report.dropped
                );
            }
        }
        QueueCommand::Clear => {
            queue.clear().await;
            println!("✅ Offline queue cleared");
        }
    }
    Ok(())
}

pub async fn export(service: &StorageService, output: Option<PathBuf>) -> Result<()> {
    let backup = service.maintenance().export_user_data().await;
    if backup.is_empty() {
        return Err(Error::Storage("Export failed, see log for details".to_string()));
    }

    match output {
        Some(path) => {
            fs::write(&path, &backup)?;
            println!("✅ Exported to {}", path.display());
        }
        None => println!("{}", backup),
    }
    Ok(())
}

pub async fn import(service: &StorageService, file: PathBuf) -> Result<()> {
    let backup = fs::read_to_string(&file)?;

    if !service.maintenance().import_user_data(&backup).await {
        return Err(Error::InvalidImport(format!("Could not import {}", file.display())));
    }

    println!("✅ Imported {}", file.display());
    Ok(())
}

pub async fn clear_user_data(service: &StorageService) -> Result<()> {
    service.maintenance().clear_user_data().await;
    println!("✅ User data cleared (preferences kept)");
    Ok(())
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

/// Initialize logging from verbosity flags and the logging config.
///
/// Returns the file writer guard, which must be held for the process lifetime.
pub fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

    let console_level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug);
    if logging.json_format {
        layers.push(console.json().with_filter(EnvFilter::new(console_level)).boxed());
    } else {
        layers.push(console.with_filter(EnvFilter::new(console_level)).boxed());
    }

    let mut guard = None;
    if logging.log_to_file {
        let path = log_file_path(&logging.log_file)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Config(format!("Invalid log file: {}", logging.log_file)))?;
        fs::create_dir_all(dir)?;

        let (writer, file_guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        let file_filter = EnvFilter::try_new(&logging.level)
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", logging.level, e)))?;
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized");
    Ok(guard)
}

/// Relative log paths live under the config directory
fn log_file_path(log_file: &str) -> Result<PathBuf> {
    let path = PathBuf::from(log_file);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(Config::config_dir()?.join(path))
    }
}

fn get_config_file(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(Config::config_dir()?.join("config.toml")),
    }
}

fn create_default_config() -> Result<String> {
    let store_path = Config::data_dir()?.join("store.json");

    Ok(format!(r#"# Salamene storage configuration
# Generated on {}

[storage]
# Store file
path = "{}"

[sync]
# Base URL that queued api_call and analytics actions are replayed against
api_base_url = "http://localhost:3000/api/"

# Request timeout in seconds
request_timeout_secs = 30

# Optional URL probed to decide whether the network is reachable
# connectivity_probe_url = "https://example.com/health"

[logging]
# Log level for the log file: error, warn, info, debug, trace
level = "info"

# Log to file
log_to_file = false

# Log file path (relative to config directory)
log_file = "logs/salamene-storage.log"

# Emit JSON lines on stderr
json_format = false
"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        store_path.display().to_string().replace('\\', "\\\\")
    ))
}
