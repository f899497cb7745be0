// Subcommand handlers; each returns the JSON document printed on stdout

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use batata_ratelimit_common::utils;
use batata_ratelimit_persistence::{
    EmbeddedRateLimitStore, EmbeddedServiceStore, RateLimit, RateLimitPersistence, ServiceInfo,
};

use crate::config::Command;

/// Input of the `seed` subcommand
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub services: Vec<SeedService>,
    pub rate_limits: Vec<SeedRateLimit>,
}

/// Service entry of a seed file; the store stamps its times on load
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedService {
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub revision: String,
}

impl From<SeedService> for ServiceInfo {
    fn from(service: SeedService) -> Self {
        ServiceInfo {
            id: service.id,
            name: service.name,
            namespace: service.namespace,
            owner: service.owner,
            revision: service.revision,
            ..Default::default()
        }
    }
}

/// Rate limit entry of a seed file
///
/// Given times are stored as-is; missing ones are taken at load time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedRateLimit {
    pub id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub labels: String,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_time: Option<DateTime<Utc>>,
}

fn default_valid() -> bool {
    true
}

impl SeedRateLimit {
    fn into_rate_limit(self, now: DateTime<Utc>) -> RateLimit {
        let create_time = self.create_time.unwrap_or(now);
        let modify_time = self.modify_time.unwrap_or_else(|| now.max(create_time));
        RateLimit {
            id: self.id,
            service_id: self.service_id,
            cluster_id: self.cluster_id,
            labels: self.labels,
            rule: self.rule,
            revision: self.revision,
            valid: self.valid,
            create_time,
            modify_time,
        }
    }
}

pub struct Admin<'a> {
    pub store: &'a EmbeddedRateLimitStore,
    pub services: &'a EmbeddedServiceStore,
}

impl Admin<'_> {
    pub fn run(&self, command: Command) -> anyhow::Result<Value> {
        match command {
            Command::Get { id } => {
                let Some(rate_limit) = self.store.get_by_id(&id)? else {
                    bail!("rate limit '{}' not found", id);
                };
                Ok(serde_json::to_value(rate_limit)?)
            }
            Command::Query {
                params,
                offset,
                limit,
            } => {
                let params: HashMap<String, String> = params.into_iter().collect();
                let page = self.store.get_extended(&params, offset, limit)?;
                let has_more = page.has_more();
                let mut out = serde_json::to_value(page)?;
                out["hasMore"] = Value::Bool(has_more);
                Ok(out)
            }
            Command::Changes {
                since,
                include_invalid,
            } => {
                let since = since.unwrap_or_else(utils::earliest);
                let delta = self.store.get_for_cache(since, include_invalid)?;
                Ok(serde_json::to_value(delta)?)
            }
            Command::Delete { id } => {
                // Only the id is read by delete
                let target = RateLimit {
                    id: id.clone(),
                    ..Default::default()
                };
                self.store.delete(&target)?;
                Ok(json!({ "deleted": id }))
            }
            Command::Seed { file } => self.seed(&file),
            Command::Health => {
                self.store.health_check()?;
                let live = self.store.count(false)?;
                let stored = self.store.count(true)?;
                Ok(json!({
                    "status": "UP",
                    "rateLimits": live,
                    "tombstones": stored.saturating_sub(live),
                    "services": self.services.list_services()?.len(),
                }))
            }
        }
    }

    fn seed(&self, file: &Path) -> anyhow::Result<Value> {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read seed file {}", file.display()))?;
        let seed: SeedFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid seed file {}", file.display()))?;

        let services = seed.services.len();
        let rate_limits = seed.rate_limits.len();

        for service in seed.services {
            let id = service.id.clone();
            self.services
                .add_service(&service.into())
                .with_context(|| format!("Failed to seed service '{}'", id))?;
        }
        let now = utils::now();
        for rate_limit in seed.rate_limits {
            let rate_limit = rate_limit.into_rate_limit(now);
            self.store
                .seed_rate_limit(&rate_limit)
                .with_context(|| format!("Failed to seed rate limit '{}'", rate_limit.id))?;
        }

        info!(
            services,
            rate_limits,
            file = %file.display(),
            "Seed file loaded"
        );
        Ok(json!({
            "services": services,
            "rateLimits": rate_limits,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batata_ratelimit_common::StoreError;
    use batata_ratelimit_persistence::{CacheConfig, KvStore, RateLimitCache, StorageConfig};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        store: EmbeddedRateLimitStore,
        services: Arc<EmbeddedServiceStore>,
        tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let config = StorageConfig::with_data_dir(tmp.path().join("data"));
            let kv = Arc::new(KvStore::open(&config).unwrap());
            let services = Arc::new(EmbeddedServiceStore::new(kv.clone()));
            Self {
                store: EmbeddedRateLimitStore::new(kv, services.clone()),
                services,
                tmp,
            }
        }

        fn admin(&self) -> Admin<'_> {
            Admin {
                store: &self.store,
                services: &self.services,
            }
        }
    }

    fn seed_file(fixture: &Fixture) -> std::path::PathBuf {
        let created = Utc::now() - Duration::hours(1);
        let seed = SeedFile {
            services: vec![SeedService {
                id: "svc-orders".to_string(),
                name: "orders".to_string(),
                namespace: "prod".to_string(),
                owner: String::new(),
                revision: String::new(),
            }],
            rate_limits: vec![SeedRateLimit {
                id: "rl-1".to_string(),
                service_id: "svc-orders".to_string(),
                cluster_id: "c1".to_string(),
                labels: String::new(),
                rule: r#"{"amount":10}"#.to_string(),
                revision: String::new(),
                valid: true,
                create_time: Some(created),
                modify_time: Some(created),
            }],
        };
        write_seed(fixture, &serde_json::to_string(&seed).unwrap())
    }

    fn write_seed(fixture: &Fixture, content: &str) -> std::path::PathBuf {
        let path = fixture.tmp.path().join("seed.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_seed_then_query() {
        let fixture = Fixture::new();
        let admin = fixture.admin();
        let file = seed_file(&fixture);

        let loaded = admin.run(Command::Seed { file }).unwrap();
        assert_eq!(loaded["rateLimits"], 1);

        let page = admin
            .run(Command::Query {
                params: vec![
                    ("name".to_string(), "orders".to_string()),
                    ("namespace".to_string(), "prod".to_string()),
                ],
                offset: 0,
                limit: 10,
            })
            .unwrap();
        assert_eq!(page["totalCount"], 1);
        assert_eq!(page["hasMore"], false);
        assert_eq!(page["pageItems"][0]["id"], "rl-1");
        assert_eq!(page["pageItems"][0]["service_name"], "orders");
        // Given times are kept
        assert_eq!(
            page["pageItems"][0]["create_time"],
            page["pageItems"][0]["modify_time"]
        );
    }

    #[test]
    fn test_query_reports_more_pages() {
        let fixture = Fixture::new();
        let admin = fixture.admin();
        let file = write_seed(
            &fixture,
            r#"{"rate_limits": [
                {"id": "rl-a", "cluster_id": "paged"},
                {"id": "rl-b", "cluster_id": "paged"},
                {"id": "rl-c", "cluster_id": "paged"}
            ]}"#,
        );
        admin.run(Command::Seed { file }).unwrap();

        let query = |offset| Command::Query {
            params: vec![("clusterid".to_string(), "paged".to_string())],
            offset,
            limit: 2,
        };
        let first = admin.run(query(0)).unwrap();
        assert_eq!(first["totalCount"], 3);
        assert_eq!(first["hasMore"], true);

        let last = admin.run(query(2)).unwrap();
        assert_eq!(last["pageItems"][0]["id"], "rl-c");
        assert_eq!(last["hasMore"], false);
    }

    #[test]
    fn test_seeded_rows_without_recent_times_reach_consumers() {
        let fixture = Fixture::new();
        let admin = fixture.admin();
        let file = write_seed(
            &fixture,
            r#"{
                "services": [{"id": "svc-1", "name": "orders", "namespace": "prod"}],
                "rate_limits": [
                    {"id": "no-times", "service_id": "svc-1"},
                    {
                        "id": "at-epoch",
                        "service_id": "svc-1",
                        "create_time": "1970-01-01T00:00:00Z",
                        "modify_time": "1970-01-01T00:00:00Z"
                    }
                ]
            }"#,
        );
        let loaded = admin.run(Command::Seed { file }).unwrap();
        assert_eq!(loaded["services"], 1);
        assert_eq!(loaded["rateLimits"], 2);

        let stored = fixture.store.get_by_id("no-times").unwrap().unwrap();
        assert!(stored.valid);
        assert!(stored.modify_time > DateTime::<Utc>::UNIX_EPOCH);
        let stored = fixture.store.get_by_id("at-epoch").unwrap().unwrap();
        assert_eq!(stored.modify_time, DateTime::<Utc>::UNIX_EPOCH);

        let changes = admin
            .run(Command::Changes {
                since: None,
                include_invalid: false,
            })
            .unwrap();
        assert_eq!(changes["rate_limits"].as_array().unwrap().len(), 2);
        assert_eq!(changes["rate_limits"][0]["id"], "at-epoch");

        let cache = RateLimitCache::new(CacheConfig::default());
        let stats = cache.sync(&fixture.store).unwrap();
        assert_eq!(stats.upserted, 2);
        assert_eq!(cache.list_by_service("svc-1").len(), 2);
    }

    #[test]
    fn test_seed_rejects_incomplete_entries() {
        let fixture = Fixture::new();
        let file = write_seed(&fixture, r#"{"services": [{"id": "svc-1"}]}"#);
        let err = fixture.admin().run(Command::Seed { file }).unwrap_err();
        assert!(format!("{:#}", err).contains("name"));
        assert!(fixture.services.list_services().unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_changes() {
        let fixture = Fixture::new();
        let admin = fixture.admin();
        admin
            .run(Command::Seed {
                file: seed_file(&fixture),
            })
            .unwrap();

        admin
            .run(Command::Delete {
                id: "rl-1".to_string(),
            })
            .unwrap();

        let err = admin
            .run(Command::Get {
                id: "rl-1".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let changes = admin
            .run(Command::Changes {
                since: None,
                include_invalid: true,
            })
            .unwrap();
        assert_eq!(changes["rate_limits"][0]["valid"], false);
        assert_eq!(changes["affected_service_ids"][0], "svc-orders");

        let health = admin.run(Command::Health).unwrap();
        assert_eq!(health["rateLimits"], 0);
        assert_eq!(health["tombstones"], 1);
    }

    #[test]
    fn test_store_errors_keep_their_type() {
        let fixture = Fixture::new();
        let err = fixture
            .admin()
            .run(Command::Delete {
                id: "ghost".to_string(),
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
    }
}
