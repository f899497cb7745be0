//! Service index trait
//!
//! Read-only access to the service registry used to resolve join criteria
//! and to enrich query results.

use std::collections::HashSet;

use batata_ratelimit_common::Result;

use crate::kv::ReadTxn;
use crate::model::ServiceInfo;

pub trait ServiceIndex: Send + Sync {
    /// Ids of every service registered under `namespace` with `name`
    fn find_service_ids(&self, namespace: &str, name: &str) -> Result<HashSet<String>>;

    /// Get a service by its id
    fn get_service(&self, id: &str) -> Result<Option<ServiceInfo>>;

    /// [`find_service_ids`](Self::find_service_ids) as seen by the snapshot
    /// `tx`. Indexes that do not live in the same store ignore `tx`.
    fn find_service_ids_in(
        &self,
        tx: &ReadTxn<'_>,
        namespace: &str,
        name: &str,
    ) -> Result<HashSet<String>> {
        let _ = tx;
        self.find_service_ids(namespace, name)
    }

    /// [`get_service`](Self::get_service) as seen by the snapshot `tx`
    fn get_service_in(&self, tx: &ReadTxn<'_>, id: &str) -> Result<Option<ServiceInfo>> {
        let _ = tx;
        self.get_service(id)
    }
}
