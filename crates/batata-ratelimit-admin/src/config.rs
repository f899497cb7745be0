//! Configuration management for the rate limit admin tool
//!
//! Settings are layered, lowest precedence first: `conf/ratelimit.yml` (or the
//! file given with `--config`), `RATELIMIT__*` environment variables, then
//! command line overrides.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment};
use serde::de::DeserializeOwned;
use tracing::Level;

use batata_ratelimit_persistence::{CacheConfig, StorageConfig};

use crate::logging::{LogRotation, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/ratelimit.yml";
pub const ENV_PREFIX: &str = "RATELIMIT";

const STORAGE_SECTION: &str = "storage";
const CACHE_SECTION: &str = "cache";
const STORAGE_DATA_DIR: &str = "storage.data_dir";
const LOGGING_LEVEL: &str = "logging.level";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "batata-ratelimit-admin", version, about = "Inspect and seed the rate limit store")]
pub struct Cli {
    /// Configuration file; a missing file is not an error
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,
    /// Overrides `storage.data_dir`
    #[arg(short = 'd', long = "data-dir", env = "RATELIMIT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    /// Overrides `logging.level`
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print one live rate limit
    Get { id: String },
    /// Run the extended query and print one page
    Query {
        /// Filter as key=value; repeatable
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Print rate limits modified after a watermark
    Changes {
        /// RFC 3339 watermark; when omitted every row is printed
        #[arg(long)]
        since: Option<chrono::DateTime<chrono::Utc>>,
        /// Include tombstones
        #[arg(long)]
        include_invalid: bool,
    },
    /// Soft-delete a rate limit
    Delete { id: String },
    /// Load services and rate limits from a JSON file
    ///
    /// Rate limits keep the times given in the file; services are stamped on load.
    Seed { file: PathBuf },
    /// Check the store and print record counts
    Health,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::from(cli.config.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(dir) = &cli.data_dir {
            config_builder = config_builder
                .set_override(STORAGE_DATA_DIR, dir.display().to_string())
                .context("Failed to set data dir override")?;
        }
        if let Some(level) = &cli.log_level {
            config_builder = config_builder
                .set_override(LOGGING_LEVEL, level.as_str())
                .context("Failed to set log level override")?;
        }

        let config = config_builder
            .build()
            .with_context(|| format!("Failed to build configuration from {}", cli.config.display()))?;

        Ok(Configuration { config })
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        self.section(STORAGE_SECTION)
    }

    pub fn cache_config(&self) -> anyhow::Result<CacheConfig> {
        self.section(CACHE_SECTION)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_level(&self) -> Level {
        self.config
            .get_string(LOGGING_LEVEL)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.config.get_string("logging.dir").ok().map(PathBuf::from)
    }

    pub fn log_to_console(&self) -> bool {
        self.config.get_bool("logging.console").unwrap_or(true)
    }

    pub fn log_to_file(&self) -> bool {
        self.config.get_bool("logging.file").unwrap_or(false)
    }

    pub fn log_rotation(&self) -> LogRotation {
        match self.config.get_string("logging.rotation").as_deref() {
            Ok("hourly") => LogRotation::Hourly,
            Ok("never") => LogRotation::Never,
            _ => LogRotation::Daily,
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        let mut logging = LoggingConfig {
            console_output: self.log_to_console(),
            console_level: self.log_level(),
            file_logging: self.log_to_file(),
            file_level: self.log_level(),
            rotation: self.log_rotation(),
            ..Default::default()
        };
        if let Some(dir) = self.log_dir() {
            logging.log_dir = dir;
        }
        logging
    }

    fn section<T: DeserializeOwned + Default>(&self, key: &str) -> anyhow::Result<T> {
        match self.config.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("Invalid '{}' configuration", key)),
        }
    }
}
