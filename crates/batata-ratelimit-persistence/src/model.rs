//! Domain model types for the rate limit store
//!
//! These types are stored in (or projected from) the embedded backend and
//! returned from the persistence traits.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rate limit rule as stored by the control plane
///
/// `valid == false` marks a tombstone: the rule was deleted but is kept so
/// replicas polling the cache feed observe the delete.
///
/// Every field is required when decoding; a stored document missing one is
/// damaged, not a default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub id: String,
    pub service_id: String,
    pub cluster_id: String,
    pub labels: String,
    pub rule: String,
    pub revision: String,
    pub valid: bool,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

impl RateLimit {
    pub fn is_tombstone(&self) -> bool {
        !self.valid
    }
}

/// A rate limit joined with the name and namespace of its service
///
/// Built only for query responses, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedRateLimit {
    #[serde(flatten)]
    pub rate_limit: RateLimit,
    pub service_name: String,
    pub namespace: String,
}

/// Service registry entry, the join target of the extended query
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub owner: String,
    pub revision: String,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

/// Offset/limit window over a fully counted result set
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: u64,
    pub offset: u64,
    pub limit: u64,
    pub page_items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total_count: u64, offset: u64, limit: u64, page_items: Vec<T>) -> Self {
        Self {
            total_count,
            offset,
            limit,
            page_items,
        }
    }

    pub fn empty(offset: u64, limit: u64) -> Self {
        Self::new(0, offset, limit, Vec::new())
    }

    /// Whether items exist beyond this window
    pub fn has_more(&self) -> bool {
        self.offset.saturating_add(self.page_items.len() as u64) < self.total_count
    }
}

/// Result of one poll of the incremental cache feed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDelta {
    /// Changed rate limits ordered by modify time, then id
    pub rate_limits: Vec<RateLimit>,
    /// Distinct service ids of every changed rate limit, sorted
    pub affected_service_ids: Vec<String>,
    /// Largest modify time in `rate_limits`; the watermark for the next poll
    pub high_watermark: Option<DateTime<Utc>>,
}

impl CacheDelta {
    pub fn from_records(mut rate_limits: Vec<RateLimit>) -> Self {
        rate_limits.sort_by(|a, b| {
            a.modify_time
                .cmp(&b.modify_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        let affected_service_ids = rate_limits
            .iter()
            .map(|r| r.service_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let high_watermark = rate_limits.last().map(|r| r.modify_time);

        Self {
            rate_limits,
            affected_service_ids,
            high_watermark,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rate_limits.is_empty()
    }
}
