//! Persistence traits for the rate limit store
//!
//! `RateLimitPersistence` is the surface the API layer calls; `ServiceIndex`
//! is the read-only view of the service registry the extended query joins
//! against. Both are synchronous: every call blocks only on storage I/O.

pub mod ratelimit;
pub mod service;

pub use ratelimit::RateLimitPersistence;
pub use service::ServiceIndex;
