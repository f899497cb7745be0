// Embedded rate limit store backed by the RocksDB key-value handle
// Provides CRUD with tombstones, the filtered/joined extended query, and the
// modify-time watermarked cache feed.

pub mod service;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use batata_ratelimit_common::{Result, StoreError, utils};

use crate::codec;
use crate::filter::RateLimitFilter;
use crate::kv::{BUCKET_RATE_LIMIT, BUCKET_SERVICE, KvStore, ReadTxn, WriteTxn};
use crate::model::{CacheDelta, ExtendedRateLimit, Page, RateLimit, ServiceInfo};
use crate::traits::{RateLimitPersistence, ServiceIndex};

pub use service::EmbeddedServiceStore;

const OP_CREATE: &str = "create";
const OP_SEED: &str = "seed";
const OP_UPDATE: &str = "update";
const OP_DELETE: &str = "delete";
const OP_GET: &str = "get_by_id";
const OP_EXTENDED: &str = "get_extended";
const OP_CACHE: &str = "get_for_cache";
const OP_COUNT: &str = "count";

/// Rate limit store over an embedded key-value handle
///
/// Every mutation runs in its own write transaction; every read runs against
/// one snapshot. Deletes only flip `valid`, so rows are never removed here.
pub struct EmbeddedRateLimitStore {
    kv: Arc<KvStore>,
    services: Arc<dyn ServiceIndex>,
}

impl EmbeddedRateLimitStore {
    pub fn new(kv: Arc<KvStore>, services: Arc<dyn ServiceIndex>) -> Self {
        Self { kv, services }
    }

    /// Store joined against the embedded service registry on the same handle
    pub fn with_embedded_services(kv: Arc<KvStore>) -> Self {
        let services = Arc::new(EmbeddedServiceStore::new(kv.clone()));
        Self::new(kv, services)
    }

    /// Insert a rate limit exactly as given, timestamps included.
    ///
    /// For seeding and migration by trusted callers only. The id must be set
    /// and free, and `modify_time` may not precede `create_time`.
    pub fn seed_rate_limit(&self, rate_limit: &RateLimit) -> Result<()> {
        require_id(OP_SEED, &rate_limit.id)?;
        if rate_limit.modify_time < rate_limit.create_time {
            return Err(StoreError::bad_param(
                OP_SEED,
                format!("rate limit '{}' modify_time precedes create_time", rate_limit.id),
            ));
        }

        self.insert(OP_SEED, rate_limit)?;
        info!(
            id = %rate_limit.id,
            modify_time = %rate_limit.modify_time,
            "Rate limit seeded"
        );
        Ok(())
    }

    fn insert(&self, op: &'static str, record: &RateLimit) -> Result<()> {
        self.kv
            .update(|tx| {
                if tx.get_for_update(BUCKET_RATE_LIMIT, &record.id)?.is_some() {
                    return Err(StoreError::AlreadyExists {
                        id: record.id.clone(),
                    });
                }
                put_rate_limit(tx, record)
            })
            .map_err(|e| e.in_op(op))
    }

    /// Look up service name/namespace for each rate limit, once per service
    fn enrich(
        &self,
        tx: &ReadTxn<'_>,
        rate_limits: Vec<RateLimit>,
    ) -> Result<Vec<ExtendedRateLimit>> {
        let mut resolved: HashMap<String, Option<ServiceInfo>> = HashMap::new();
        let mut extended = Vec::with_capacity(rate_limits.len());

        for rate_limit in rate_limits {
            if !resolved.contains_key(&rate_limit.service_id) {
                let service = self.services.get_service_in(tx, &rate_limit.service_id)?;
                resolved.insert(rate_limit.service_id.clone(), service);
            }
            let (service_name, namespace) = match resolved.get(&rate_limit.service_id) {
                Some(Some(service)) => (service.name.clone(), service.namespace.clone()),
                _ => (String::new(), String::new()),
            };
            extended.push(ExtendedRateLimit {
                rate_limit,
                service_name,
                namespace,
            });
        }

        Ok(extended)
    }
}

fn require_id(op: &'static str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::bad_param(op, "rate limit id is empty"));
    }
    Ok(())
}

fn put_rate_limit(tx: &WriteTxn<'_>, record: &RateLimit) -> Result<()> {
    tx.put(BUCKET_RATE_LIMIT, &record.id, &codec::encode(record)?)
}

fn load_for_update(tx: &WriteTxn<'_>, id: &str) -> Result<Option<RateLimit>> {
    match tx.get_for_update(BUCKET_RATE_LIMIT, id)? {
        Some(bytes) => Ok(Some(codec::decode(id, &bytes)?)),
        None => Ok(None),
    }
}

fn scan_rate_limits<F>(tx: &ReadTxn<'_>, mut f: F) -> Result<()>
where
    F: FnMut(RateLimit) -> Result<()>,
{
    tx.for_each(BUCKET_RATE_LIMIT, |key, value| {
        let rate_limit = codec::decode::<RateLimit>(key, value).inspect_err(|e| {
            warn!(key = %key, "Undecodable rate limit in bucket: {}", e);
        })?;
        f(rate_limit)
    })
}

impl RateLimitPersistence for EmbeddedRateLimitStore {
    fn create(&self, rate_limit: &RateLimit) -> Result<()> {
        require_id(OP_CREATE, &rate_limit.id)?;

        let now = utils::now();
        let record = RateLimit {
            create_time: now,
            modify_time: now,
            ..rate_limit.clone()
        };
        self.insert(OP_CREATE, &record)?;

        info!(
            id = %record.id,
            service_id = %record.service_id,
            cluster_id = %record.cluster_id,
            "Rate limit created"
        );
        Ok(())
    }

    fn update(&self, rate_limit: &RateLimit) -> Result<()> {
        require_id(OP_UPDATE, &rate_limit.id)?;

        let modify_time = self
            .kv
            .update(|tx| {
                let existing = load_for_update(tx, &rate_limit.id)?
                    .ok_or_else(|| StoreError::not_found(OP_UPDATE, &rate_limit.id))?;

                let record = RateLimit {
                    id: existing.id,
                    service_id: rate_limit.service_id.clone(),
                    cluster_id: rate_limit.cluster_id.clone(),
                    labels: rate_limit.labels.clone(),
                    rule: rate_limit.rule.clone(),
                    revision: rate_limit.revision.clone(),
                    valid: rate_limit.valid,
                    create_time: existing.create_time,
                    modify_time: utils::next_modify_time(existing.modify_time),
                };
                put_rate_limit(tx, &record)?;
                Ok(record.modify_time)
            })
            .map_err(|e| e.in_op(OP_UPDATE))?;

        info!(
            id = %rate_limit.id,
            revision = %rate_limit.revision,
            modify_time = %modify_time,
            "Rate limit updated"
        );
        Ok(())
    }

    fn delete(&self, rate_limit: &RateLimit) -> Result<()> {
        require_id(OP_DELETE, &rate_limit.id)?;

        let deleted = self
            .kv
            .update(|tx| {
                let mut existing = load_for_update(tx, &rate_limit.id)?
                    .ok_or_else(|| StoreError::not_found(OP_DELETE, &rate_limit.id))?;
                if existing.is_tombstone() {
                    return Ok(false);
                }

                existing.valid = false;
                existing.modify_time = utils::next_modify_time(existing.modify_time);
                put_rate_limit(tx, &existing)?;
                Ok(true)
            })
            .map_err(|e| e.in_op(OP_DELETE))?;

        if deleted {
            info!(id = %rate_limit.id, "Rate limit deleted");
        } else {
            debug!(id = %rate_limit.id, "Rate limit already deleted");
        }
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<RateLimit>> {
        let found = self
            .kv
            .view(|tx| match tx.get(BUCKET_RATE_LIMIT, id)? {
                Some(bytes) => Ok(Some(codec::decode::<RateLimit>(id, &bytes)?)),
                None => Ok(None),
            })
            .map_err(|e| e.in_op(OP_GET))?;

        Ok(found.filter(|r| r.valid))
    }

    fn get_extended(
        &self,
        params: &HashMap<String, String>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ExtendedRateLimit>> {
        let filter = RateLimitFilter::from_params(params)?;

        // Join resolution, scan and enrichment share one snapshot
        let page = self
            .kv
            .view(|tx| {
                let resolved = filter.resolve(|namespace, name| {
                    self.services.find_service_ids_in(tx, namespace, name)
                })?;
                if resolved.is_unsatisfiable() {
                    debug!(params = ?params, "Service join matched nothing");
                    return Ok(Page::empty(offset, limit));
                }

                let mut matched = Vec::new();
                scan_rate_limits(tx, |rate_limit| {
                    if rate_limit.valid && resolved.matches(&rate_limit) {
                        matched.push(rate_limit);
                    }
                    Ok(())
                })?;

                matched.sort_by(|a, b| a.id.cmp(&b.id));
                let total = matched.len() as u64;
                let window: Vec<RateLimit> = matched
                    .into_iter()
                    .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                    .take(usize::try_from(limit).unwrap_or(usize::MAX))
                    .collect();
                let items = self.enrich(tx, window)?;
                Ok(Page::new(total, offset, limit, items))
            })
            .map_err(|e| e.in_op(OP_EXTENDED))?;

        debug!(
            total = page.total_count,
            offset = offset,
            limit = limit,
            returned = page.page_items.len(),
            "Extended rate limit query"
        );
        Ok(page)
    }

    fn get_for_cache(&self, watermark: DateTime<Utc>, include_invalid: bool) -> Result<CacheDelta> {
        let changed = self
            .kv
            .view(|tx| {
                let mut changed = Vec::new();
                scan_rate_limits(tx, |rate_limit| {
                    if rate_limit.modify_time > watermark && (include_invalid || rate_limit.valid)
                    {
                        changed.push(rate_limit);
                    }
                    Ok(())
                })?;
                Ok(changed)
            })
            .map_err(|e| e.in_op(OP_CACHE))?;

        let delta = CacheDelta::from_records(changed);
        debug!(
            watermark = %watermark,
            include_invalid = include_invalid,
            changed = delta.rate_limits.len(),
            "Rate limit cache feed"
        );
        Ok(delta)
    }

    fn count(&self, include_invalid: bool) -> Result<u64> {
        self.kv
            .view(|tx| {
                let mut count = 0u64;
                scan_rate_limits(tx, |rate_limit| {
                    if include_invalid || rate_limit.valid {
                        count += 1;
                    }
                    Ok(())
                })?;
                Ok(count)
            })
            .map_err(|e| e.in_op(OP_COUNT))
    }

    fn health_check(&self) -> Result<()> {
        for bucket in [BUCKET_RATE_LIMIT, BUCKET_SERVICE] {
            if !self.kv.has_bucket(bucket) {
                return Err(StoreError::storage(
                    "health_check",
                    format!("bucket '{}'", bucket),
                    std::io::Error::other("bucket missing"),
                ));
            }
        }
        Ok(())
    }
}
