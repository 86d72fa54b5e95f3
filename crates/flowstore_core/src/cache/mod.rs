//! Bounded cache of materialized entities.
//!
//! # Responsibility
//! - Avoid redundant row-to-entity loads for recently used primary keys.
//!
//! # Invariants
//! - Strict least-recently-used eviction; reads and inserts both count as
//!   access.
//! - Entries leave only through capacity pressure or explicit mutation;
//!   there is no time-based expiry.
//! - The cache is never authoritative: a miss falls through to the store.

mod model_cache;

pub use model_cache::{CacheKey, KeyPart, ModelCache, PkSignature};
