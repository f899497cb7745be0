//! Value encoding for stored entities
//!
//! Every value is a JSON document carrying a format version `v` next to the
//! entity fields. Unknown fields are ignored on read, so a newer writer may
//! add fields without breaking older readers; a newer `v` is refused.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use batata_ratelimit_common::{Result, StoreError};

use crate::model::{RateLimit, ServiceInfo};

/// Format version written by this build
pub const ENCODING_VERSION: u16 = 1;

/// An entity persisted under its own id
pub trait StoredEntity: Serialize + DeserializeOwned {
    /// Primary key of this entity
    fn key(&self) -> &str;

    /// Schema invariants a decoded value must satisfy
    fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.key().is_empty() {
            return Err("empty id".to_string());
        }
        Ok(())
    }
}

impl StoredEntity for RateLimit {
    fn key(&self) -> &str {
        &self.id
    }

    fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("empty id".to_string());
        }
        if self.modify_time < self.create_time {
            return Err(format!(
                "modify_time {} precedes create_time {}",
                self.modify_time, self.create_time
            ));
        }
        Ok(())
    }
}

impl StoredEntity for ServiceInfo {
    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Serialize)]
struct DocumentRef<'a, T> {
    v: u16,
    #[serde(flatten)]
    entity: &'a T,
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    v: u16,
}

#[derive(Deserialize)]
struct Document<T> {
    #[serde(flatten)]
    entity: T,
}

/// Encode `entity` as a versioned document
pub fn encode<T: StoredEntity>(entity: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&DocumentRef {
        v: ENCODING_VERSION,
        entity,
    })
    .map_err(|e| StoreError::consistency(entity.key(), format!("encode failed: {}", e)))
}

/// Decode the document stored under `key`
pub fn decode<T: StoredEntity>(key: &str, bytes: &[u8]) -> Result<T> {
    let header: VersionHeader = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::consistency(key, format!("malformed document: {}", e)))?;
    if header.v == 0 || header.v > ENCODING_VERSION {
        return Err(StoreError::consistency(
            key,
            format!(
                "unsupported encoding version {} (supported up to {})",
                header.v, ENCODING_VERSION
            ),
        ));
    }

    let document: Document<T> = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::consistency(key, format!("decode failed: {}", e)))?;
    let entity = document.entity;

    if entity.key() != key {
        return Err(StoreError::consistency(
            key,
            format!("stored id '{}' does not match its key", entity.key()),
        ));
    }
    entity
        .check_invariants()
        .map_err(|reason| StoreError::consistency(key, reason))?;

    Ok(entity)
}
