//! Batata Rate Limit Common - Shared types and helpers
//!
//! This crate provides the foundational types used by the rate limit store
//! and its tooling:
//! - Error taxonomy and error codes
//! - Query parameter names accepted by the extended rate limit query
//! - Clock helpers for modify-time watermarks

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, Result, StoreError};

/// Extended query parameter: exact match on the rate limit cluster id
pub const PARAM_CLUSTER_ID: &str = "clusterid";
/// Extended query parameter: substring match on the rate limit labels
pub const PARAM_LABELS: &str = "labels";
/// Extended query parameter: service name, must be paired with [`PARAM_NAMESPACE`]
pub const PARAM_SERVICE_NAME: &str = "name";
/// Extended query parameter: service namespace, must be paired with [`PARAM_SERVICE_NAME`]
pub const PARAM_NAMESPACE: &str = "namespace";

/// Every parameter name the extended query recognizes
pub const EXTENDED_QUERY_PARAMS: &[&str] = &[
    PARAM_CLUSTER_ID,
    PARAM_LABELS,
    PARAM_SERVICE_NAME,
    PARAM_NAMESPACE,
];
