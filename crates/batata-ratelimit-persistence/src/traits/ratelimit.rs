//! Rate limit persistence trait
//!
//! Defines the interface for rate limit storage operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use batata_ratelimit_common::Result;

use crate::model::{CacheDelta, ExtendedRateLimit, Page, RateLimit};

/// Rate limit persistence operations
pub trait RateLimitPersistence: Send + Sync {
    /// Create a rate limit under its caller-supplied id.
    ///
    /// Create and modify times are stamped by the store.
    fn create(&self, rate_limit: &RateLimit) -> Result<()>;

    /// Replace every mutable field of an existing rate limit
    fn update(&self, rate_limit: &RateLimit) -> Result<()>;

    /// Soft-delete a rate limit, leaving a tombstone behind
    fn delete(&self, rate_limit: &RateLimit) -> Result<()>;

    /// Get a live rate limit; tombstones and unknown ids yield `None`
    fn get_by_id(&self, id: &str) -> Result<Option<RateLimit>>;

    /// Filter live rate limits, join them with their services and return the
    /// `[offset, offset + limit)` window ordered by id
    fn get_extended(
        &self,
        params: &HashMap<String, String>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ExtendedRateLimit>>;

    /// Every rate limit modified strictly after `watermark`, tombstones
    /// included when `include_invalid` is set
    fn get_for_cache(&self, watermark: DateTime<Utc>, include_invalid: bool)
    -> Result<CacheDelta>;

    /// Number of stored rate limits
    fn count(&self, include_invalid: bool) -> Result<u64>;

    /// Health check for the storage backend
    fn health_check(&self) -> Result<()>;
}
