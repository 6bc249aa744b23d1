//! # catalyst-cache
//!
//! The decision cache: a TTL-bounded KV keyed by decision-token strings.
//!
//! A cache hit preempts the whole forward-auth pipeline, so the stored
//! entry must reproduce the original allow response byte-for-byte (the
//! gateway only overlays the decision-token header). Writes are
//! last-writer-wins; every writer computes the same headers for the same
//! token, so no coordination is needed.

pub mod backend;

pub use backend::{CacheSetOptions, DecisionCache, DecisionCacheEntry, MemoryDecisionCache};
