// Embedded service registry kept in the `service` bucket
// Serves as the join target of the extended rate limit query

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use batata_ratelimit_common::{Result, StoreError, utils};

use crate::codec;
use crate::kv::{BUCKET_SERVICE, KvStore, ReadTxn};
use crate::model::ServiceInfo;
use crate::traits::ServiceIndex;

/// Service registry stored next to the rate limits
pub struct EmbeddedServiceStore {
    kv: Arc<KvStore>,
}

impl EmbeddedServiceStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Register a service, replacing any entry with the same id.
    ///
    /// The create time of a replaced entry is kept.
    pub fn add_service(&self, service: &ServiceInfo) -> Result<()> {
        if service.id.is_empty() {
            return Err(StoreError::bad_param("add_service", "service id is empty"));
        }

        self.kv
            .update(|tx| {
                let now = utils::now();
                let create_time = match tx.get_for_update(BUCKET_SERVICE, &service.id)? {
                    Some(bytes) => codec::decode::<ServiceInfo>(&service.id, &bytes)?.create_time,
                    None => now,
                };
                let record = ServiceInfo {
                    create_time,
                    modify_time: now.max(create_time),
                    ..service.clone()
                };
                tx.put(BUCKET_SERVICE, &record.id, &codec::encode(&record)?)
            })
            .map_err(|e| e.in_op("add_service"))?;

        info!(
            id = %service.id,
            namespace = %service.namespace,
            name = %service.name,
            "Service registered"
        );
        Ok(())
    }

    /// Remove a service; returns whether it existed
    pub fn delete_service(&self, id: &str) -> Result<bool> {
        let existed = self
            .kv
            .update(|tx| {
                if tx.get_for_update(BUCKET_SERVICE, id)?.is_none() {
                    return Ok(false);
                }
                tx.delete(BUCKET_SERVICE, id)?;
                Ok(true)
            })
            .map_err(|e| e.in_op("delete_service"))?;

        if existed {
            info!(id = %id, "Service removed");
        }
        Ok(existed)
    }

    /// List every registered service ordered by id
    pub fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        self.kv
            .view(|tx| {
                let mut services = Vec::new();
                scan_services(tx, |service| {
                    services.push(service);
                    Ok(())
                })?;
                Ok(services)
            })
            .map_err(|e| e.in_op("list_services"))
    }
}

fn scan_services<F>(tx: &ReadTxn<'_>, mut f: F) -> Result<()>
where
    F: FnMut(ServiceInfo) -> Result<()>,
{
    tx.for_each(BUCKET_SERVICE, |key, value| {
        f(codec::decode::<ServiceInfo>(key, value)?)
    })
}

fn find_ids(tx: &ReadTxn<'_>, namespace: &str, name: &str) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    scan_services(tx, |service| {
        if service.namespace == namespace && service.name == name {
            ids.insert(service.id);
        }
        Ok(())
    })?;
    Ok(ids)
}

fn load_service(tx: &ReadTxn<'_>, id: &str) -> Result<Option<ServiceInfo>> {
    match tx.get(BUCKET_SERVICE, id)? {
        Some(bytes) => Ok(Some(codec::decode::<ServiceInfo>(id, &bytes)?)),
        None => Ok(None),
    }
}

impl ServiceIndex for EmbeddedServiceStore {
    fn find_service_ids(&self, namespace: &str, name: &str) -> Result<HashSet<String>> {
        let ids = self
            .kv
            .view(|tx| find_ids(tx, namespace, name))
            .map_err(|e| e.in_op("find_service_ids"))?;

        debug!(
            namespace = %namespace,
            name = %name,
            matched = ids.len(),
            "Resolved service join"
        );
        Ok(ids)
    }

    fn get_service(&self, id: &str) -> Result<Option<ServiceInfo>> {
        self.kv
            .view(|tx| load_service(tx, id))
            .map_err(|e| e.in_op("get_service"))
    }

    fn find_service_ids_in(
        &self,
        tx: &ReadTxn<'_>,
        namespace: &str,
        name: &str,
    ) -> Result<HashSet<String>> {
        if !tx.is_of(&self.kv) {
            return self.find_service_ids(namespace, name);
        }
        find_ids(tx, namespace, name).map_err(|e| e.in_op("find_service_ids"))
    }

    fn get_service_in(&self, tx: &ReadTxn<'_>, id: &str) -> Result<Option<ServiceInfo>> {
        if !tx.is_of(&self.kv) {
            return self.get_service(id);
        }
        load_service(tx, id).map_err(|e| e.in_op("get_service"))
    }
}
