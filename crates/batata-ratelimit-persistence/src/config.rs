//! Storage and replica cache settings
//!
//! Both structs deserialize with defaults for every field, so a partial
//! configuration source only needs to name what it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Block compression applied to every bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Snappy,
    #[default]
    Lz4,
    Zstd,
}

impl From<Compression> for rocksdb::DBCompressionType {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::None => rocksdb::DBCompressionType::None,
            Compression::Snappy => rocksdb::DBCompressionType::Snappy,
            Compression::Lz4 => rocksdb::DBCompressionType::Lz4,
            Compression::Zstd => rocksdb::DBCompressionType::Zstd,
        }
    }
}

/// RocksDB settings for the embedded store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the RocksDB files
    pub data_dir: PathBuf,
    /// Memtable size per bucket, in MiB
    pub write_buffer_size_mb: usize,
    /// Memtables kept before writes stall
    pub max_write_buffer_number: i32,
    /// Shared LRU block cache, in MiB
    pub block_cache_mb: usize,
    pub compression: Compression,
    /// How long a write transaction waits for a row lock held by another
    /// writer before failing, in milliseconds
    pub lock_timeout_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            data_dir: PathBuf::from(format!("{}/batata/data/ratelimit", home)),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            block_cache_mb: 256,
            compression: Compression::Lz4,
            lock_timeout_ms: 1000,
        }
    }
}

impl StorageConfig {
    /// Default settings rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

/// Settings for [`crate::cache::RateLimitCache`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Window re-read behind the watermark on every poll, in milliseconds
    pub poll_overlap_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            poll_overlap_ms: 1000,
        }
    }
}

impl CacheConfig {
    pub fn poll_overlap(&self) -> Duration {
        Duration::from_millis(self.poll_overlap_ms)
    }
}
