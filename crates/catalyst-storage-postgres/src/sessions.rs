//! Session storage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use catalyst_core::{
    CatalystError, CatalystResult, NewSession, Session, SessionTouch,
};
use catalyst_storage::SessionStore;

use crate::{PgPool, db_error, decode_error};

type SessionTuple = (
    String,
    String,
    OffsetDateTime,
    OffsetDateTime,
    Value,
    Option<Value>,
);

const SESSION_COLUMNS: &str = "id, user_id, created_at, last_seen_at, factors, metadata";

fn session_from_tuple(row: SessionTuple) -> CatalystResult<Session> {
    let factors: Vec<String> =
        serde_json::from_value(row.4).map_err(|e| decode_error("session", e))?;
    Ok(Session {
        id: row.0,
        user_id: row.1,
        created_at: row.2,
        last_seen_at: row.3,
        factors_verified: factors,
        metadata: row.5,
    })
}

/// PostgreSQL [`SessionStore`].
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    /// Creates a session store over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get_session(&self, id: &str) -> CatalystResult<Option<Session>> {
        let row: Option<SessionTuple> = query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM catalyst_session WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(session_from_tuple).transpose()
    }

    async fn create_session(&self, input: NewSession) -> CatalystResult<Session> {
        let factors =
            serde_json::to_value(&input.factors_verified).map_err(|e| decode_error("session", e))?;
        let created_at = input.created_at.unwrap_or_else(OffsetDateTime::now_utc);

        let row: SessionTuple = query_as(&format!(
            r#"
            INSERT INTO catalyst_session (id, user_id, created_at, last_seen_at, factors, metadata)
            VALUES ($1, $2, $3, NOW(), $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&input.id)
        .bind(&input.user_id)
        .bind(created_at)
        .bind(&factors)
        .bind(&input.metadata)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return CatalystError::duplicate_id(format!(
                    "session '{}' already exists",
                    input.id
                ));
            }
            db_error(e)
        })?;

        session_from_tuple(row)
    }

    async fn touch_session(&self, id: &str, touch: SessionTouch) -> CatalystResult<Session> {
        let row: Option<SessionTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_session
            SET last_seen_at = $2,
                metadata = COALESCE($3, metadata)
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(touch.last_seen_at)
        .bind(&touch.metadata)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(session_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("session {id}")))
    }

    async fn delete_session(&self, id: &str) -> CatalystResult<bool> {
        let result = query("DELETE FROM catalyst_session WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}
