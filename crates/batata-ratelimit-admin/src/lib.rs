//! Batata Rate Limit Admin - operator tool for the embedded rate limit store
//!
//! This crate provides:
//! - Layered configuration (file, environment, command line)
//! - Console and rolling-file logging setup
//! - Subcommands to inspect, query, delete and seed rate limits

pub mod commands;
pub mod config;
pub mod logging;

pub use commands::{Admin, SeedFile, SeedRateLimit, SeedService};
pub use config::{Cli, Command, Configuration};
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
