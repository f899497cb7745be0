//! In-memory replica of the rate limit table
//!
//! The replica is fed by polling [`RateLimitPersistence::get_for_cache`] with
//! its own watermark. Tombstones evict, live rows upsert, and a row is only
//! applied when it is newer than the local copy, so re-reading the overlap
//! window behind the watermark is harmless.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use batata_ratelimit_common::{Result, utils};

use crate::config::CacheConfig;
use crate::model::{CacheDelta, RateLimit};
use crate::traits::RateLimitPersistence;

/// Outcome of applying one cache delta
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub upserted: usize,
    pub removed: usize,
    /// Rows not newer than the local copy, or tombstones for unknown ids
    pub skipped: usize,
    /// Services whose rule set changed, sorted
    pub affected_service_ids: Vec<String>,
}

impl SyncStats {
    pub fn changed(&self) -> bool {
        self.upserted > 0 || self.removed > 0
    }
}

/// Live rate limits indexed by id and by service
#[derive(Debug, Default)]
pub struct RateLimitCache {
    rate_limits: DashMap<String, RateLimit>,
    by_service: DashMap<String, HashSet<String>>,
    // Held for the whole poll so concurrent syncs apply in order
    watermark: Mutex<Option<DateTime<Utc>>>,
    config: CacheConfig,
}

impl RateLimitCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Poll `source` for changes since the last sync and apply them.
    ///
    /// The first sync reads the whole table.
    pub fn sync(&self, source: &dyn RateLimitPersistence) -> Result<SyncStats> {
        let mut watermark = self.watermark.lock();
        let since = self.poll_from(*watermark);

        let delta = source.get_for_cache(since, true)?;
        let stats = self.apply_locked(&mut watermark, &delta);

        if stats.changed() {
            info!(
                since = %since,
                upserted = stats.upserted,
                removed = stats.removed,
                services = stats.affected_service_ids.len(),
                "Rate limit cache synced"
            );
        } else {
            debug!(since = %since, skipped = stats.skipped, "Rate limit cache up to date");
        }
        Ok(stats)
    }

    /// Apply a delta obtained elsewhere
    pub fn apply(&self, delta: &CacheDelta) -> SyncStats {
        let mut watermark = self.watermark.lock();
        self.apply_locked(&mut watermark, delta)
    }

    pub fn get(&self, id: &str) -> Option<RateLimit> {
        self.rate_limits.get(id).map(|r| r.clone())
    }

    /// Live rate limits of one service, ordered by id
    pub fn list_by_service(&self, service_id: &str) -> Vec<RateLimit> {
        let ids: Vec<String> = match self.by_service.get(service_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        let mut rate_limits: Vec<RateLimit> = ids.iter().filter_map(|id| self.get(id)).collect();
        rate_limits.sort_by(|a, b| a.id.cmp(&b.id));
        rate_limits
    }

    pub fn len(&self) -> usize {
        self.rate_limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rate_limits.is_empty()
    }

    /// Largest modify time applied so far
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        *self.watermark.lock()
    }

    fn poll_from(&self, watermark: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let Some(watermark) = watermark else {
            return utils::earliest();
        };
        let overlap = chrono::Duration::from_std(self.config.poll_overlap())
            .unwrap_or_else(|_| chrono::Duration::zero());
        watermark
            .checked_sub_signed(overlap)
            .unwrap_or_else(utils::earliest)
    }

    fn apply_locked(&self, watermark: &mut Option<DateTime<Utc>>, delta: &CacheDelta) -> SyncStats {
        let mut stats = SyncStats::default();
        let mut affected = BTreeSet::new();

        for incoming in &delta.rate_limits {
            let local_modify_time = self.rate_limits.get(&incoming.id).map(|r| r.modify_time);
            if local_modify_time.is_some_and(|local| local >= incoming.modify_time) {
                stats.skipped += 1;
                continue;
            }

            if incoming.valid {
                let previous = self
                    .rate_limits
                    .insert(incoming.id.clone(), incoming.clone());
                if let Some(previous) = previous.filter(|p| p.service_id != incoming.service_id) {
                    self.unindex(&previous);
                    affected.insert(previous.service_id);
                }
                self.by_service
                    .entry(incoming.service_id.clone())
                    .or_default()
                    .insert(incoming.id.clone());
                affected.insert(incoming.service_id.clone());
                stats.upserted += 1;
            } else if let Some((_, previous)) = self.rate_limits.remove(&incoming.id) {
                self.unindex(&previous);
                affected.insert(previous.service_id);
                stats.removed += 1;
            } else {
                stats.skipped += 1;
            }
        }

        if let Some(high) = delta.high_watermark {
            *watermark = Some(watermark.map_or(high, |current| current.max(high)));
        }
        stats.affected_service_ids = affected.into_iter().collect();
        stats
    }

    fn unindex(&self, rate_limit: &RateLimit) {
        if let Some(mut ids) = self.by_service.get_mut(&rate_limit.service_id) {
            ids.remove(&rate_limit.id);
        }
        self.by_service
            .remove_if(&rate_limit.service_id, |_, ids| ids.is_empty());
    }
}
