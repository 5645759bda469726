pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::preferences::Theme;
use crate::queue::{ActionType, HttpMethod};
use crate::service::StorageService;
use crate::zodiac::{Timeframe, ZodiacSign};

#[derive(Parser)]
#[command(name = "salamene-storage")]
#[command(about = "Inspect and maintain the Salamene offline store")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SALAMENE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show storage usage statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or modify cache entries
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Inspect or modify user preferences
    #[command(subcommand)]
    Prefs(PrefsCommand),

    /// Inspect or drain the offline action queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Export all user data as a JSON backup
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore user data from a JSON backup
    Import {
        /// Backup file
        file: PathBuf,
    },

    /// Remove cached data and queued actions, keeping preferences
    ClearUserData,

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print a cached value if still valid
    Get {
        key: String,
        /// Show the raw entry including timestamps, even if expired
        #[arg(long)]
        raw: bool,
    },

    /// Cache a JSON value
    Set {
        key: String,
        /// JSON value
        value: String,
        /// Custom lifetime in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// Remove one cache entry
    Remove { key: String },

    /// Remove every cache entry
    Clear,

    /// Print a cached horoscope reading
    Horoscope {
        sign: ZodiacSign,
        #[arg(default_value = "daily")]
        timeframe: Timeframe,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommand {
    /// Print current preferences
    Show,

    /// Update selected preference fields
    Set(PrefsSetArgs),

    /// Forget stored preferences
    Reset,
}

#[derive(Args, Debug, Default)]
pub struct PrefsSetArgs {
    #[arg(long)]
    pub theme: Option<Theme>,

    #[arg(long)]
    pub notifications: Option<bool>,

    /// Daily reminder time, HH:MM
    #[arg(long)]
    pub reminder_time: Option<String>,

    /// Favorite sign (repeatable); replaces the current set
    #[arg(long = "favorite")]
    pub favorites: Vec<ZodiacSign>,

    #[arg(long)]
    pub last_read: Option<String>,

    #[arg(long)]
    pub trial_used: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List pending actions, oldest first
    List,

    /// Enqueue an action
    Add {
        action_type: ActionType,
        method: HttpMethod,
        endpoint: String,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
    },

    /// Remove an action by id
    Remove { id: String },

    /// Replay pending actions against the configured API
    Process,

    /// Discard every pending action
    Clear,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Commands::Completions { shell } = self.command {
            commands::generate_completions(shell);
            return Ok(());
        }

        let config = Config::resolve(self.config.as_deref())?;
        let _log_guard = commands::init_logging(self.debug, self.verbose, &config.logging)?;

        if let Commands::Init { force } = self.command {
            return commands::init(self.config, force).await;
        }

        let service = StorageService::open(&config).await?;

        match self.command {
            Commands::Stats { json } => commands::stats(&service, json).await,
            Commands::Cache(cmd) => commands::cache(&service, cmd).await,
            Commands::Prefs(cmd) => commands::prefs(&service, cmd).await,
            Commands::Queue(cmd) => commands::queue(&service, &config, cmd).await,
            Commands::Export { output } => commands::export(&service, output).await,
            Commands::Import { file } => commands::import(&service, file).await,
            Commands::ClearUserData => commands::clear_user_data(&service).await,
            Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
        }
    }
}
