//! API key records.
//!
//! A key is an opaque secret issued to a user, org, or service principal.
//! Only the SHA-256 hash of the secret is persisted. The `status` column is
//! a cached materialization: readers must recompute the effective status
//! from `(revoked_at, expires_at, now)` via [`Key::derived_status`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::labels::LabelSet;

/// The kind of principal a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOwnerKind {
    /// A human user; identity resolution goes through the profile stores.
    User,
    /// An organization principal.
    Org,
    /// A headless service principal.
    Service,
}

/// The owning principal of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOwner {
    /// Principal kind.
    pub kind: KeyOwnerKind,
    /// Principal id (user id, org id, or service id).
    pub id: String,
}

impl KeyOwner {
    /// Creates a user-owned key owner.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: KeyOwnerKind::User,
            id: id.into(),
        }
    }

    /// Creates an org-owned key owner.
    #[must_use]
    pub fn org(id: impl Into<String>) -> Self {
        Self {
            kind: KeyOwnerKind::Org,
            id: id.into(),
        }
    }

    /// Creates a service-owned key owner.
    #[must_use]
    pub fn service(id: impl Into<String>) -> Self {
        Self {
            kind: KeyOwnerKind::Service,
            id: id.into(),
        }
    }
}

/// Lifecycle status of a key.
///
/// `Expired` is never written to storage; it is derived at read time from
/// `expires_at`. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// The key may authenticate requests.
    Active,
    /// The key's `expires_at` has passed.
    Expired,
    /// The key was explicitly revoked.
    Revoked,
}

/// A persisted API key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Globally unique key id.
    pub id: String,
    /// SHA-256 hex digest of the secret; globally unique.
    pub hash: String,
    /// Owning principal.
    pub owner: KeyOwner,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Id of the actor that issued the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Expiry instant; `expires_at <= now` means expired (inclusive).
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Timestamp of the most recent authenticated use.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
    /// Monotonic use counter.
    pub usage_count: u64,
    /// Cached status; readers use [`Key::derived_status`] instead.
    pub status: KeyStatus,
    /// Granted scopes; a set (duplicates removed before persistence).
    pub scopes: Vec<String>,
    /// Labels merged into the caller's identity on key auth.
    #[serde(default)]
    pub labels: LabelSet,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Revocation instant; set once, never cleared.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    /// Actor that revoked the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    /// Reason given at revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl Key {
    /// Computes the effective status at `now`.
    ///
    /// Revocation wins over expiry; expiry is inclusive (`expires_at == now`
    /// is expired).
    #[must_use]
    pub fn derived_status(&self, now: OffsetDateTime) -> KeyStatus {
        if self.revoked_at.is_some() {
            KeyStatus::Revoked
        } else if self.expires_at.is_some_and(|exp| exp <= now) {
            KeyStatus::Expired
        } else {
            KeyStatus::Active
        }
    }

    /// Returns `true` if the key may authenticate a request at `now`.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.derived_status(now) == KeyStatus::Active
    }

    /// Returns a copy with `status` rematerialized for `now`.
    ///
    /// Store reads pass records through this so callers never observe a
    /// stale cached column.
    #[must_use]
    pub fn with_derived_status(mut self, now: OffsetDateTime) -> Self {
        self.status = self.derived_status(now);
        self
    }
}

/// Input to key issuance. The hash is computed by the caller (the SDK
/// hashes the generated secret); the store only enforces uniqueness.
#[derive(Debug, Clone)]
pub struct NewKey {
    /// Explicit id, or `None` to let the store mint one.
    pub id: Option<String>,
    /// SHA-256 hex digest of the secret.
    pub hash: String,
    /// Owning principal.
    pub owner: KeyOwner,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Issuing actor.
    pub created_by: Option<String>,
    /// Expiry instant.
    pub expires_at: Option<OffsetDateTime>,
    /// Requested scopes; deduplicated on insert.
    pub scopes: Vec<String>,
    /// Labels attached to the key.
    pub labels: LabelSet,
    /// Free-form metadata.
    pub metadata: Option<Value>,
}

impl NewKey {
    /// Creates a minimal issuance input for `owner` with the given hash.
    #[must_use]
    pub fn new(hash: impl Into<String>, owner: KeyOwner) -> Self {
        Self {
            id: None,
            hash: hash.into(),
            owner,
            name: None,
            description: None,
            created_by: None,
            expires_at: None,
            scopes: Vec::new(),
            labels: LabelSet::new(),
            metadata: None,
        }
    }
}

/// Options for revocation.
#[derive(Debug, Clone, Default)]
pub struct RevokeKeyOptions {
    /// Actor performing the revocation.
    pub revoked_by: Option<String>,
    /// Reason recorded on the key.
    pub reason: Option<String>,
    /// Revocation instant; defaults to now.
    pub revoked_at: Option<OffsetDateTime>,
}

/// Filters for listing an owner's keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListKeysOptions {
    /// Include revoked keys in the listing.
    pub include_revoked: bool,
    /// Include expired keys in the listing.
    pub include_expired: bool,
}

/// SHA-256 hex digest of an API-key secret; the stored `hash` value.
#[must_use]
pub fn hash_key_secret(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Removes duplicate scopes preserving first-seen order.
#[must_use]
pub fn dedupe_scopes(scopes: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    scopes
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn key_at(now: OffsetDateTime) -> Key {
        Key {
            id: "key-1".into(),
            hash: "abc".into(),
            owner: KeyOwner::user("user-1"),
            name: None,
            description: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            status: KeyStatus::Active,
            scopes: vec![],
            labels: LabelSet::new(),
            metadata: None,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn test_derived_status_active() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(key_at(now).derived_status(now), KeyStatus::Active);
    }

    #[test]
    fn test_derived_status_expiry_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        let mut key = key_at(now);
        key.expires_at = Some(now);
        assert_eq!(key.derived_status(now), KeyStatus::Expired);

        key.expires_at = Some(now + Duration::seconds(1));
        assert_eq!(key.derived_status(now), KeyStatus::Active);
    }

    #[test]
    fn test_revocation_wins_over_expiry() {
        let now = OffsetDateTime::now_utc();
        let mut key = key_at(now);
        key.expires_at = Some(now - Duration::hours(1));
        key.revoked_at = Some(now);
        assert_eq!(key.derived_status(now), KeyStatus::Revoked);
    }

    #[test]
    fn test_dedupe_scopes_preserves_order() {
        let scopes = dedupe_scopes(["read", "write", "read", "admin"].map(String::from));
        assert_eq!(scopes, vec!["read", "write", "admin"]);
    }

    #[test]
    fn test_hash_key_secret_is_sha256_hex() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash_key_secret(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_key_secret("key-secret").len(), 64);
    }
}
