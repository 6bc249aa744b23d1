//! In-memory key store.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use catalyst_core::{
    CatalystError, CatalystResult, Key, KeyOwner, KeyStatus, ListKeysOptions, NewKey,
    RevokeKeyOptions, dedupe_scopes,
};

use crate::keys::KeyStore;

/// In-memory [`KeyStore`] backed by a `RwLock`'d map.
///
/// The single write lock makes `issue_key` atomic with respect to the
/// id/hash uniqueness checks, matching the contract the SQL adapter gets
/// from unique indexes.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Key>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn issue_key(&self, input: NewKey) -> CatalystResult<Key> {
        let mut keys = self.keys.write().await;

        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if keys.contains_key(&id) {
            return Err(CatalystError::duplicate_id(format!(
                "key with id '{id}' already exists"
            )));
        }
        if keys.values().any(|k| k.hash == input.hash) {
            return Err(CatalystError::duplicate_hash(
                "a key with the same hash already exists",
            ));
        }

        let now = OffsetDateTime::now_utc();
        let key = Key {
            id: id.clone(),
            hash: input.hash,
            owner: input.owner,
            name: input.name,
            description: input.description,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
            expires_at: input.expires_at,
            last_used_at: None,
            usage_count: 0,
            status: KeyStatus::Active,
            scopes: dedupe_scopes(input.scopes),
            labels: input.labels,
            metadata: input.metadata,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        };
        keys.insert(id, key.clone());
        Ok(key.with_derived_status(now))
    }

    async fn get_key_by_id(&self, id: &str) -> CatalystResult<Option<Key>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .keys
            .read()
            .await
            .get(id)
            .cloned()
            .map(|k| k.with_derived_status(now)))
    }

    async fn get_key_by_hash(&self, hash: &str) -> CatalystResult<Option<Key>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .keys
            .read()
            .await
            .values()
            .find(|k| k.hash == hash)
            .cloned()
            .map(|k| k.with_derived_status(now)))
    }

    async fn list_keys_by_owner(
        &self,
        owner: &KeyOwner,
        options: ListKeysOptions,
    ) -> CatalystResult<Vec<Key>> {
        let now = OffsetDateTime::now_utc();
        let mut keys: Vec<Key> = self
            .keys
            .read()
            .await
            .values()
            .filter(|k| &k.owner == owner)
            .cloned()
            .map(|k| k.with_derived_status(now))
            .filter(|k| match k.status {
                KeyStatus::Revoked => options.include_revoked,
                KeyStatus::Expired => options.include_expired,
                KeyStatus::Active => true,
            })
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(keys)
    }

    async fn record_key_usage(
        &self,
        id: &str,
        used_at: Option<OffsetDateTime>,
    ) -> CatalystResult<Key> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("key {id}")))?;

        let stamp = used_at.unwrap_or_else(OffsetDateTime::now_utc);
        key.usage_count += 1;
        key.last_used_at = Some(stamp);
        key.updated_at = stamp;
        Ok(key.clone().with_derived_status(OffsetDateTime::now_utc()))
    }

    async fn revoke_key(&self, id: &str, options: RevokeKeyOptions) -> CatalystResult<Key> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("key {id}")))?;

        let revoked_at = options.revoked_at.unwrap_or_else(OffsetDateTime::now_utc);
        key.status = KeyStatus::Revoked;
        key.revoked_at = Some(revoked_at);
        key.revoked_by = options.revoked_by;
        key.revocation_reason = options.reason;
        key.updated_at = revoked_at;
        Ok(key.clone().with_derived_status(OffsetDateTime::now_utc()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn new_key(hash: &str) -> NewKey {
        NewKey::new(hash, KeyOwner::user("user-1"))
    }

    #[tokio::test]
    async fn test_issue_and_get_round_trip() {
        let store = MemoryKeyStore::new();
        let issued = store.issue_key(new_key("h1")).await.unwrap();

        let fetched = store.get_key_by_id(&issued.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, issued.id);
        assert_eq!(fetched.hash, "h1");
        assert_eq!(fetched.status, KeyStatus::Active);
        assert_eq!(fetched.usage_count, 0);
    }

    #[tokio::test]
    async fn test_issue_dedupes_scopes() {
        let store = MemoryKeyStore::new();
        let mut input = new_key("h1");
        input.scopes = vec!["read".into(), "write".into(), "read".into()];
        let issued = store.issue_key(input).await.unwrap();
        assert_eq!(issued.scopes, vec!["read", "write"]);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let store = MemoryKeyStore::new();
        store.issue_key(new_key("h1")).await.unwrap();
        let err = store.issue_key(new_key("h1")).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_hash");
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryKeyStore::new();
        let mut first = new_key("h1");
        first.id = Some("key-1".into());
        store.issue_key(first).await.unwrap();

        let mut second = new_key("h2");
        second.id = Some("key-1".into());
        let err = store.issue_key(second).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_id");
    }

    #[tokio::test]
    async fn test_usage_increments_exactly_n_times() {
        let store = MemoryKeyStore::new();
        let issued = store.issue_key(new_key("h1")).await.unwrap();

        for _ in 0..5 {
            store.record_key_usage(&issued.id, None).await.unwrap();
        }
        let key = store.get_key_by_id(&issued.id).await.unwrap().unwrap();
        assert_eq!(key.usage_count, 5);
        assert!(key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_in_outcome() {
        let store = MemoryKeyStore::new();
        let issued = store.issue_key(new_key("h1")).await.unwrap();

        let first = store
            .revoke_key(&issued.id, RevokeKeyOptions::default())
            .await
            .unwrap();
        assert_eq!(first.status, KeyStatus::Revoked);

        let later = OffsetDateTime::now_utc() + Duration::seconds(5);
        let second = store
            .revoke_key(
                &issued.id,
                RevokeKeyOptions {
                    revoked_at: Some(later),
                    revoked_by: Some("admin".into()),
                    reason: Some("rotated".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.status, KeyStatus::Revoked);
        assert_eq!(second.revoked_at, Some(later));
        assert_eq!(second.revoked_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_expired_key_reads_as_expired() {
        let store = MemoryKeyStore::new();
        let mut input = new_key("h1");
        input.expires_at = Some(OffsetDateTime::now_utc() - Duration::seconds(1));
        let issued = store.issue_key(input).await.unwrap();
        assert_eq!(issued.status, KeyStatus::Expired);

        let fetched = store.get_key_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(fetched.status, KeyStatus::Expired);
        assert_eq!(issued.id, fetched.id);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = MemoryKeyStore::new();
        let owner = KeyOwner::user("user-1");

        let active = store.issue_key(new_key("h1")).await.unwrap();
        let revoked = store.issue_key(new_key("h2")).await.unwrap();
        store
            .revoke_key(&revoked.id, RevokeKeyOptions::default())
            .await
            .unwrap();
        let mut expiring = new_key("h3");
        expiring.expires_at = Some(OffsetDateTime::now_utc() - Duration::hours(1));
        let expired = store.issue_key(expiring).await.unwrap();

        let visible = store
            .list_keys_by_owner(&owner, ListKeysOptions::default())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, active.id);

        let all = store
            .list_keys_by_owner(
                &owner,
                ListKeysOptions {
                    include_revoked: true,
                    include_expired: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|k| k.id == expired.id));
    }

    #[tokio::test]
    async fn test_usage_on_missing_key_is_not_found() {
        let store = MemoryKeyStore::new();
        let err = store.record_key_usage("nope", None).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
