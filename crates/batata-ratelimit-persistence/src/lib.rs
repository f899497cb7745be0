//! Batata Rate Limit Persistence - Embedded store for rate limit rules
//!
//! This crate provides:
//! - A transactional RocksDB handle with buckets (`kv`)
//! - Persistence trait abstractions for rate limits and the service registry
//! - The embedded backend with soft-delete tombstones, filtered and joined
//!   queries, and a modify-time watermarked cache feed
//! - An in-memory replica that polls the cache feed

pub mod cache;
pub mod codec;
pub mod config;
pub mod embedded;
pub mod filter;
pub mod kv;
pub mod model;
pub mod traits;

// Re-export persistence traits
pub use traits::{RateLimitPersistence, ServiceIndex};

// Re-export embedded backend
pub use embedded::{EmbeddedRateLimitStore, EmbeddedServiceStore};
pub use kv::KvStore;

pub use cache::{RateLimitCache, SyncStats};
pub use config::{CacheConfig, Compression, StorageConfig};
pub use filter::RateLimitFilter;

// Re-export model types
pub use model::{CacheDelta, ExtendedRateLimit, Page, RateLimit, ServiceInfo};
