//! Append-only audit log storage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use catalyst_core::{AuditEvent, AuditFilter, CatalystResult, NewAuditEvent};
use catalyst_storage::AuditStore;

use crate::{PgPool, db_error};

type AuditTuple = (
    String,
    OffsetDateTime,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<Value>,
    Option<String>,
);

const AUDIT_COLUMNS: &str =
    "id, occurred_at, category, action, actor, subject, resource, metadata, correlation_id";

fn event_from_tuple(row: AuditTuple) -> AuditEvent {
    AuditEvent {
        id: row.0,
        occurred_at: row.1,
        category: row.2,
        action: row.3,
        actor: row.4,
        subject: row.5,
        resource: row.6,
        metadata: row.7,
        correlation_id: row.8,
    }
}

/// PostgreSQL [`AuditStore`]. Rows are only ever inserted.
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    /// Creates an audit log over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PostgresAuditLog {
    async fn append_event(&self, event: NewAuditEvent) -> CatalystResult<AuditEvent> {
        let id = event.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let occurred_at = event.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);

        let row: AuditTuple = query_as(&format!(
            r#"
            INSERT INTO catalyst_audit_event
                (id, occurred_at, category, action, actor, subject, resource, metadata, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(occurred_at)
        .bind(&event.category)
        .bind(&event.action)
        .bind(&event.actor)
        .bind(&event.subject)
        .bind(&event.resource)
        .bind(&event.metadata)
        .bind(&event.correlation_id)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        Ok(event_from_tuple(row))
    }

    async fn list_events(&self, filter: AuditFilter) -> CatalystResult<Vec<AuditEvent>> {
        // Filters are optional, so each predicate collapses to TRUE when
        // its bind is NULL.
        let limit = filter.limit.map_or(i64::MAX, |l| l as i64);
        let rows: Vec<AuditTuple> = query_as(&format!(
            r#"
            SELECT {AUDIT_COLUMNS}
            FROM catalyst_audit_event
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2::text IS NULL OR actor = $2)
              AND ($3::timestamptz IS NULL OR occurred_at >= $3)
              AND ($4::timestamptz IS NULL OR occurred_at < $4)
            ORDER BY occurred_at ASC, id ASC
            LIMIT $5
            "#
        ))
        .bind(&filter.category)
        .bind(&filter.actor)
        .bind(filter.since)
        .bind(filter.until)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(event_from_tuple).collect())
    }
}
