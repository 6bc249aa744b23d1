//! API key storage.
//!
//! Hot fields live in typed columns: the hash uniqueness index makes
//! `issue_key` atomic, and `record_key_usage` is a single conditional
//! `UPDATE`. Cold fields (name, scopes, labels, metadata, revocation
//! bookkeeping) live in a `detail` JSONB column.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use catalyst_core::{
    CatalystError, CatalystResult, Key, KeyOwner, KeyOwnerKind, KeyStatus, LabelSet,
    ListKeysOptions, NewKey, RevokeKeyOptions, dedupe_scopes,
};
use catalyst_storage::KeyStore;

use crate::{PgPool, db_error, decode_error};

type KeyTuple = (
    String,                    // id
    String,                    // hash
    String,                    // owner_kind
    String,                    // owner_id
    OffsetDateTime,            // created_at
    OffsetDateTime,            // updated_at
    Option<OffsetDateTime>,    // expires_at
    Option<OffsetDateTime>,    // last_used_at
    i64,                       // usage_count
    String,                    // status
    Option<OffsetDateTime>,    // revoked_at
    Value,                     // detail
);

const KEY_COLUMNS: &str = "id, hash, owner_kind, owner_id, created_at, updated_at, \
     expires_at, last_used_at, usage_count, status, revoked_at, detail";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct KeyDetail {
    name: Option<String>,
    description: Option<String>,
    created_by: Option<String>,
    scopes: Vec<String>,
    labels: LabelSet,
    metadata: Option<Value>,
    revoked_by: Option<String>,
    revocation_reason: Option<String>,
}

fn owner_kind_str(kind: KeyOwnerKind) -> &'static str {
    match kind {
        KeyOwnerKind::User => "user",
        KeyOwnerKind::Org => "org",
        KeyOwnerKind::Service => "service",
    }
}

fn parse_owner_kind(raw: &str) -> CatalystResult<KeyOwnerKind> {
    match raw {
        "user" => Ok(KeyOwnerKind::User),
        "org" => Ok(KeyOwnerKind::Org),
        "service" => Ok(KeyOwnerKind::Service),
        other => Err(CatalystError::storage(format!(
            "unknown key owner kind '{other}'"
        ))),
    }
}

fn key_from_tuple(row: KeyTuple) -> CatalystResult<Key> {
    let detail: KeyDetail =
        serde_json::from_value(row.11).map_err(|e| decode_error("key", e))?;
    let stored_status = match row.9.as_str() {
        "revoked" => KeyStatus::Revoked,
        _ => KeyStatus::Active,
    };
    Ok(Key {
        id: row.0,
        hash: row.1,
        owner: KeyOwner {
            kind: parse_owner_kind(&row.2)?,
            id: row.3,
        },
        name: detail.name,
        description: detail.description,
        created_by: detail.created_by,
        created_at: row.4,
        updated_at: row.5,
        expires_at: row.6,
        last_used_at: row.7,
        usage_count: row.8.max(0) as u64,
        status: stored_status,
        scopes: detail.scopes,
        labels: detail.labels,
        metadata: detail.metadata,
        revoked_at: row.10,
        revoked_by: detail.revoked_by,
        revocation_reason: detail.revocation_reason,
    }
    .with_derived_status(OffsetDateTime::now_utc()))
}

/// PostgreSQL [`KeyStore`].
pub struct PostgresKeyStore {
    pool: Arc<PgPool>,
}

impl PostgresKeyStore {
    /// Creates a key store over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn issue_key(&self, input: NewKey) -> CatalystResult<Key> {
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let detail = KeyDetail {
            name: input.name,
            description: input.description,
            created_by: input.created_by,
            scopes: dedupe_scopes(input.scopes),
            labels: input.labels,
            metadata: input.metadata,
            revoked_by: None,
            revocation_reason: None,
        };
        let detail_json =
            serde_json::to_value(&detail).map_err(|e| decode_error("key", e))?;

        let row: KeyTuple = query_as(&format!(
            r#"
            INSERT INTO catalyst_key (id, hash, owner_kind, owner_id, expires_at, detail)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&input.hash)
        .bind(owner_kind_str(input.owner.kind))
        .bind(&input.owner.id)
        .bind(input.expires_at)
        .bind(&detail_json)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                let constraint = db_err.constraint().unwrap_or_default();
                if constraint.contains("hash") {
                    return CatalystError::duplicate_hash(
                        "a key with the same hash already exists",
                    );
                }
                return CatalystError::duplicate_id(format!(
                    "key with id '{id}' already exists"
                ));
            }
            db_error(e)
        })?;

        key_from_tuple(row)
    }

    async fn get_key_by_id(&self, id: &str) -> CatalystResult<Option<Key>> {
        let row: Option<KeyTuple> = query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM catalyst_key WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(key_from_tuple).transpose()
    }

    async fn get_key_by_hash(&self, hash: &str) -> CatalystResult<Option<Key>> {
        let row: Option<KeyTuple> = query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM catalyst_key WHERE hash = $1"
        ))
        .bind(hash)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(key_from_tuple).transpose()
    }

    async fn list_keys_by_owner(
        &self,
        owner: &KeyOwner,
        options: ListKeysOptions,
    ) -> CatalystResult<Vec<Key>> {
        let mut sql = format!(
            "SELECT {KEY_COLUMNS} FROM catalyst_key WHERE owner_kind = $1 AND owner_id = $2"
        );
        if !options.include_revoked {
            sql.push_str(" AND revoked_at IS NULL");
        }
        if !options.include_expired {
            sql.push_str(" AND (expires_at IS NULL OR expires_at > NOW() OR revoked_at IS NOT NULL)");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let rows: Vec<KeyTuple> = query_as(&sql)
            .bind(owner_kind_str(owner.kind))
            .bind(&owner.id)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        rows.into_iter().map(key_from_tuple).collect()
    }

    async fn record_key_usage(
        &self,
        id: &str,
        used_at: Option<OffsetDateTime>,
    ) -> CatalystResult<Key> {
        let stamp = used_at.unwrap_or_else(OffsetDateTime::now_utc);
        let row: Option<KeyTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_key
            SET usage_count = usage_count + 1,
                last_used_at = $2,
                updated_at = $2
            WHERE id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(stamp)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(key_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("key {id}")))
    }

    async fn revoke_key(&self, id: &str, options: RevokeKeyOptions) -> CatalystResult<Key> {
        let revoked_at = options.revoked_at.unwrap_or_else(OffsetDateTime::now_utc);
        let stamp = serde_json::json!({
            "revokedBy": options.revoked_by,
            "revocationReason": options.reason,
        });
        let row: Option<KeyTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_key
            SET status = 'revoked',
                revoked_at = $2,
                updated_at = $2,
                detail = detail || $3::jsonb
            WHERE id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(revoked_at)
        .bind(&stamp)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(key_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("key {id}")))
    }
}
