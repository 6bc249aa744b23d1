//! API key storage trait.
//!
//! # Implementation Notes
//!
//! Implementations must:
//!
//! - Enforce global uniqueness of `id` and `hash` atomically with the
//!   insert (no check-then-write races)
//! - Recompute the derived status on every read so callers never observe
//!   a stale `status` column
//! - Make `record_key_usage` an atomic increment

use async_trait::async_trait;
use time::OffsetDateTime;

use catalyst_core::{
    CatalystResult, Key, KeyOwner, ListKeysOptions, NewKey, RevokeKeyOptions,
};

/// Storage trait for API keys.
///
/// Implementations are provided in-memory (this crate) and for PostgreSQL
/// (`catalyst-storage-postgres`).
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Inserts a new key with `status = active` and deduplicated scopes.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` or `DuplicateHash` on uniqueness violations,
    /// or `Storage` if the insert fails.
    async fn issue_key(&self, input: NewKey) -> CatalystResult<Key>;

    /// Looks a key up by id. Status is recomputed at read time.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_key_by_id(&self, id: &str) -> CatalystResult<Option<Key>>;

    /// Looks a key up by secret hash. Status is recomputed at read time.
    ///
    /// This is the hot lookup on the forward-auth API-key path.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_key_by_hash(&self, hash: &str) -> CatalystResult<Option<Key>>;

    /// Lists an owner's keys in `created_at DESC` order, filtering revoked
    /// and expired keys unless the options ask to include them.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_keys_by_owner(
        &self,
        owner: &KeyOwner,
        options: ListKeysOptions,
    ) -> CatalystResult<Vec<Key>>;

    /// Atomically applies `usage_count += 1` and stamps `last_used_at`
    /// and `updated_at` with `used_at` (now when `None`).
    ///
    /// Revoked keys are not special-cased; the counter still moves.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    async fn record_key_usage(
        &self,
        id: &str,
        used_at: Option<OffsetDateTime>,
    ) -> CatalystResult<Key>;

    /// Revokes a key. Idempotent in outcome: a second call re-stamps the
    /// revocation fields but does not error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    async fn revoke_key(&self, id: &str, options: RevokeKeyOptions) -> CatalystResult<Key>;
}
