// Integration tests for the embedded rate limit store
// Covers the public persistence surface end to end against a real RocksDB directory

use std::collections::HashMap;
use std::sync::Arc;

use batata_ratelimit_common::StoreError;
use batata_ratelimit_persistence::{
    CacheConfig, EmbeddedRateLimitStore, EmbeddedServiceStore, KvStore, RateLimit,
    RateLimitCache, RateLimitPersistence, ServiceInfo, StorageConfig,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use tempfile::TempDir;

struct Fixture {
    store: EmbeddedRateLimitStore,
    services: Arc<EmbeddedServiceStore>,
    _tmp: TempDir,
}

fn setup() -> Fixture {
    let tmp_dir = TempDir::new().unwrap();
    let kv = Arc::new(KvStore::open(&StorageConfig::with_data_dir(tmp_dir.path())).unwrap());
    let services = Arc::new(EmbeddedServiceStore::new(kv.clone()));
    Fixture {
        store: EmbeddedRateLimitStore::new(kv, services.clone()),
        services,
        _tmp: tmp_dir,
    }
}

fn rand_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn new_rate_limit(id: &str) -> RateLimit {
    RateLimit {
        id: id.to_string(),
        service_id: rand_string(10),
        cluster_id: rand_string(10),
        labels: rand_string(20),
        rule: rand_string(20),
        revision: rand_string(30),
        valid: true,
        create_time: Utc::now(),
        modify_time: Utc::now(),
    }
}

fn strip_times(mut rate_limit: RateLimit) -> RateLimit {
    rate_limit.create_time = DateTime::<Utc>::default();
    rate_limit.modify_time = DateTime::<Utc>::default();
    rate_limit
}

fn register_service(services: &EmbeddedServiceStore, service_id: &str, revision: &str) {
    services
        .add_service(&ServiceInfo {
            id: service_id.to_string(),
            name: service_id.to_string(),
            namespace: service_id.to_string(),
            owner: "batata".to_string(),
            revision: revision.to_string(),
            ..Default::default()
        })
        .unwrap();
}

#[test]
fn test_create_then_get_by_id() {
    let f = setup();
    let input = new_rate_limit(&uuid::Uuid::new_v4().to_string());

    f.store.create(&input).unwrap();

    let saved = f.store.get_by_id(&input.id).unwrap().unwrap();
    assert_eq!(strip_times(saved), strip_times(input));
    assert!(f.store.get_by_id("never-created").unwrap().is_none());
}

#[test]
fn test_create_rejects_empty_id() {
    let f = setup();
    let err = f.store.create(&new_rate_limit("")).unwrap_err();
    assert!(matches!(err, StoreError::BadParam { .. }));
    assert_eq!(err.code().code, 10000);
}

#[test]
fn test_update_then_get_by_id() {
    let f = setup();
    let mut input = new_rate_limit(&uuid::Uuid::new_v4().to_string());
    f.store.create(&input).unwrap();

    input.revision = rand_string(15);
    input.rule = rand_string(25);
    f.store.update(&input).unwrap();

    let saved = f.store.get_by_id(&input.id).unwrap().unwrap();
    assert_eq!(strip_times(saved), strip_times(input));
}

#[test]
fn test_delete_hides_rate_limit() {
    let f = setup();
    let input = new_rate_limit(&uuid::Uuid::new_v4().to_string());
    f.store.create(&input).unwrap();

    f.store.delete(&input).unwrap();

    assert!(f.store.get_by_id(&input.id).unwrap().is_none());
    assert_eq!(f.store.count(false).unwrap(), 0);
    assert_eq!(f.store.count(true).unwrap(), 1);
}

#[test]
fn test_get_extended_by_cluster_and_labels() {
    let f = setup();

    let mut cluster_2 = Vec::new();
    let mut cluster_3 = Vec::new();
    let mut cluster_5 = Vec::new();

    for i in 0..10 {
        let mut val = new_rate_limit(&uuid::Uuid::new_v4().to_string());
        if i % 2 == 0 {
            val.service_id = "Service_Cluster_2".to_string();
            val.cluster_id = "Cluster_2".to_string();
            val.labels = "Cluster_2@@Labels@@12345".to_string();
            cluster_2.push(val.clone());
        } else if i % 3 == 0 {
            val.service_id = "Service_Cluster_3".to_string();
            val.cluster_id = "Cluster_3".to_string();
            val.labels = "Cluster_3@@Labels@@67890".to_string();
            cluster_3.push(val.clone());
        } else if i % 5 == 0 {
            val.service_id = "Service_Cluster_5".to_string();
            val.cluster_id = "Cluster_5".to_string();
            val.labels = "Cluster_5@@Labels@@abcde".to_string();
            cluster_5.push(val.clone());
        }

        register_service(&f.services, &val.service_id, &val.revision);
        f.store.create(&val).unwrap();
    }

    let by_id = |mut vals: Vec<RateLimit>| {
        vals.sort_by(|a, b| a.id.cmp(&b.id));
        vals.into_iter().map(strip_times).collect::<Vec<_>>()
    };

    // Exact cluster match joined with the owning service
    let params = HashMap::from([
        ("clusterid".to_string(), "Cluster_2".to_string()),
        ("name".to_string(), "Service_Cluster_2".to_string()),
        ("namespace".to_string(), "Service_Cluster_2".to_string()),
    ]);
    let page = f.store.get_extended(&params, 0, 10).unwrap();
    assert_eq!(page.total_count, cluster_2.len() as u64);
    assert!(page
        .page_items
        .iter()
        .all(|e| e.service_name == "Service_Cluster_2" && e.namespace == "Service_Cluster_2"));
    let got = page.page_items.into_iter().map(|e| e.rate_limit).collect();
    assert_eq!(by_id(got), by_id(cluster_2));

    // Label fragment joined with the owning service
    let params = HashMap::from([
        ("labels".to_string(), "Cluster_3".to_string()),
        ("name".to_string(), "Service_Cluster_3".to_string()),
        ("namespace".to_string(), "Service_Cluster_3".to_string()),
    ]);
    let page = f.store.get_extended(&params, 0, 10).unwrap();
    assert_eq!(page.total_count, cluster_3.len() as u64);
    let got = page.page_items.into_iter().map(|e| e.rate_limit).collect();
    assert_eq!(by_id(got), by_id(cluster_3));

    // Label fragment alone
    let params = HashMap::from([("labels".to_string(), "Labels@@abcde".to_string())]);
    let page = f.store.get_extended(&params, 0, 10).unwrap();
    assert_eq!(page.total_count, cluster_5.len() as u64);
}

#[test]
fn test_get_for_cache_with_seeded_times() {
    let f = setup();
    let base = Utc::now() - Duration::minutes(30);

    let mut seeded = Vec::new();
    for i in 0..10 {
        let mut val = new_rate_limit(&uuid::Uuid::new_v4().to_string());
        val.create_time = base;
        val.modify_time = base + Duration::minutes(i + 20);
        f.store.seed_rate_limit(&val).unwrap();
        seeded.push(val);
    }

    let watermark = Utc::now() - Duration::minutes(5);
    let delta = f.store.get_for_cache(watermark, false).unwrap();

    // Only rows modified 26..=29 minutes after the base are past the watermark
    let expected: Vec<RateLimit> = seeded
        .iter()
        .filter(|r| r.modify_time > watermark)
        .cloned()
        .collect();
    assert_eq!(expected.len(), 4);
    assert_eq!(delta.rate_limits, expected);

    let mut services: Vec<String> = expected.iter().map(|r| r.service_id.clone()).collect();
    services.sort();
    services.dedup();
    assert_eq!(delta.affected_service_ids, services);
}

#[test]
fn test_cache_feed_carries_tombstones() {
    let f = setup();
    let keep = new_rate_limit("keep");
    let gone = new_rate_limit("gone");
    f.store.create(&keep).unwrap();
    f.store.create(&gone).unwrap();

    let watermark = f.store.get_for_cache(Utc::now() - Duration::hours(1), true).unwrap();
    let watermark = watermark.high_watermark.unwrap();

    f.store.delete(&gone).unwrap();

    let delta = f.store.get_for_cache(watermark, true).unwrap();
    assert_eq!(delta.rate_limits.len(), 1);
    assert_eq!(delta.rate_limits[0].id, "gone");
    assert!(!delta.rate_limits[0].valid);

    let live_only = f.store.get_for_cache(watermark, false).unwrap();
    assert!(live_only.is_empty());
}

#[test]
fn test_replica_follows_store() {
    let f = setup();
    let cache = RateLimitCache::new(CacheConfig::default());

    let mut val = new_rate_limit("replicated");
    f.store.create(&val).unwrap();
    cache.sync(&f.store).unwrap();
    assert_eq!(cache.get("replicated").unwrap().rule, val.rule);

    val.rule = "rule-v2".to_string();
    f.store.update(&val).unwrap();
    cache.sync(&f.store).unwrap();
    assert_eq!(cache.get("replicated").unwrap().rule, "rule-v2");

    f.store.delete(&val).unwrap();
    cache.sync(&f.store).unwrap();
    assert!(cache.get("replicated").is_none());
    assert!(cache.is_empty());
}

const MAX_ATTEMPTS: usize = 50;

#[test]
fn test_concurrent_updates_advance_modify_time() {
    let f = setup();
    let store = Arc::new(f.store);
    store.create(&new_rate_limit("contended")).unwrap();
    let created = store.get_by_id("contended").unwrap().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut written = Vec::new();
                for _ in 0..10 {
                    let payload = new_rate_limit("contended");
                    let mut attempts = 0;
                    // Lock timeouts surface as retryable storage errors
                    loop {
                        attempts += 1;
                        match store.update(&payload) {
                            Ok(()) => break,
                            Err(e) if e.is_retryable() && attempts < MAX_ATTEMPTS => {
                                std::thread::yield_now();
                            }
                            Err(e) => panic!("update failed after {attempts} attempts: {e}"),
                        }
                    }
                    written.push(payload);
                }
                written
            })
        })
        .collect();
    let written: Vec<Vec<RateLimit>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(written.iter().all(|w| w.len() == 10));

    let saved = store.get_by_id("contended").unwrap().unwrap();
    assert_eq!(saved.create_time, created.create_time);
    assert!(saved.modify_time > created.modify_time);

    // The stored row is the last write of exactly one thread, never a mix
    let last_writes: Vec<RateLimit> = written
        .into_iter()
        .map(|w| strip_times(w.last().cloned().unwrap()))
        .collect();
    let stored = strip_times(saved.clone());
    assert_eq!(last_writes.iter().filter(|w| **w == stored).count(), 1);

    // The cache feed reports only the latest version
    let delta = store.get_for_cache(saved.create_time, true).unwrap();
    assert_eq!(delta.rate_limits, vec![saved.clone()]);
    assert_eq!(delta.high_watermark, Some(saved.modify_time));
}

mod pagination {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_pages_partition_the_result(count in 0usize..25, limit in 1u64..8) {
            let f = setup();
            for i in 0..count {
                let mut val = new_rate_limit(&format!("rl-{:03}", i));
                val.cluster_id = "paged".to_string();
                f.store.create(&val).unwrap();
            }
            let params = HashMap::from([("clusterid".to_string(), "paged".to_string())]);

            let mut seen = Vec::new();
            let mut offset = 0;
            loop {
                let page = f.store.get_extended(&params, offset, limit).unwrap();
                prop_assert_eq!(page.total_count, count as u64);
                prop_assert!(page.page_items.len() as u64 <= limit);
                if page.page_items.is_empty() {
                    break;
                }
                offset += page.page_items.len() as u64;
                seen.extend(page.page_items.into_iter().map(|e| e.rate_limit.id));
            }

            let expected: Vec<String> = (0..count).map(|i| format!("rl-{:03}", i)).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
