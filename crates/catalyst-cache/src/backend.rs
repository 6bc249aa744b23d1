//! Decision cache contract and the in-memory backend.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use catalyst_core::CatalystResult;

/// A cached allow decision: the exact response headers plus the absolute
/// expiry carried for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCacheEntry {
    /// The response headers of the original allow decision.
    pub headers: BTreeMap<String, String>,
    /// Absolute expiry of the decision.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Options for a cache write.
#[derive(Debug, Clone, Default)]
pub struct CacheSetOptions {
    /// Entry lifetime in seconds.
    pub ttl_seconds: u64,
    /// Advisory tags; backends may index them, none is required to.
    pub tags: Vec<String>,
}

/// The decision cache port.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Backend name, surfaced by the health endpoint.
    fn name(&self) -> &str;

    /// Looks an entry up; expired entries read as misses.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` error when the backend fails.
    async fn get(&self, key: &str) -> CatalystResult<Option<DecisionCacheEntry>>;

    /// Stores an entry for `options.ttl_seconds`.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` error when the backend fails. Callers on the
    /// hot path downgrade the error to a log line.
    async fn set(
        &self,
        key: &str,
        entry: DecisionCacheEntry,
        options: CacheSetOptions,
    ) -> CatalystResult<()>;

    /// Removes an entry.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` error when the backend fails.
    async fn delete(&self, key: &str) -> CatalystResult<()>;

    /// Backend liveness probe for the health endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` error describing the failing backend.
    async fn probe(&self) -> CatalystResult<()>;
}

struct StoredEntry {
    entry: DecisionCacheEntry,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Single-process [`DecisionCache`] over a `DashMap`, with expiry checked
/// on read. Suited to one-replica deployments; multi-replica setups plug
/// a shared KV backend into the same port.
pub struct MemoryDecisionCache {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryDecisionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    /// Returns `true` when no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryDecisionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionCache for MemoryDecisionCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> CatalystResult<Option<DecisionCacheEntry>> {
        if let Some(stored) = self.entries.get(key) {
            if !stored.is_expired() {
                tracing::debug!(key = %key, "decision cache hit");
                return Ok(Some(stored.entry.clone()));
            }
            drop(stored);
            self.entries.remove(key);
        }
        tracing::debug!(key = %key, "decision cache miss");
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        entry: DecisionCacheEntry,
        options: CacheSetOptions,
    ) -> CatalystResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                entry,
                stored_at: Instant::now(),
                ttl: Duration::from_secs(options.ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CatalystResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn probe(&self) -> CatalystResult<()> {
        Ok(())
    }
}
