pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod preferences;
pub mod queue;
pub mod service;
pub mod storage;
pub mod zodiac;

pub use config::Config;
pub use error::{Error, Result};
pub use service::StorageService;
