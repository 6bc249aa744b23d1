//! Table and index creation.

use sqlx_core::executor::Executor;

use catalyst_core::CatalystResult;

use crate::{PgPool, db_error};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_key (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        owner_kind TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at TIMESTAMPTZ,
        last_used_at TIMESTAMPTZ,
        usage_count BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        revoked_at TIMESTAMPTZ,
        detail JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS catalyst_key_hash_idx ON catalyst_key (hash)",
    "CREATE INDEX IF NOT EXISTS catalyst_key_owner_idx ON catalyst_key (owner_kind, owner_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_session (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        factors JSONB NOT NULL DEFAULT '[]'::jsonb,
        metadata JSONB
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_session_user_idx ON catalyst_session (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_audit_event (
        id TEXT PRIMARY KEY,
        occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        category TEXT NOT NULL,
        action TEXT NOT NULL,
        actor TEXT,
        subject TEXT,
        resource TEXT,
        metadata JSONB,
        correlation_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_audit_order_idx ON catalyst_audit_event (occurred_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_subscription (
        id TEXT PRIMARY KEY,
        org_id TEXT,
        event_types JSONB NOT NULL,
        target_url TEXT NOT NULL,
        secret TEXT NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}'::jsonb,
        retry_policy JSONB NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        metadata JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_delivery (
        id TEXT PRIMARY KEY,
        subscription_id TEXT NOT NULL,
        event_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempt_count BIGINT NOT NULL DEFAULT 0,
        last_attempt_at TIMESTAMPTZ,
        next_attempt_at TIMESTAMPTZ,
        payload JSONB NOT NULL,
        response JSONB,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_delivery_queue_idx ON catalyst_delivery (status, next_attempt_at ASC NULLS FIRST, created_at ASC)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_profile (
        id TEXT PRIMARY KEY,
        authentik_id TEXT NOT NULL,
        resource JSONB NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS catalyst_profile_authentik_idx ON catalyst_profile (authentik_id)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_org (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL,
        resource JSONB NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS catalyst_org_slug_idx ON catalyst_org (slug)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_group (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        resource JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_group_org_idx ON catalyst_group (org_id)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_membership (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        resource JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_membership_user_idx ON catalyst_membership (user_id, created_at ASC)",
    r#"
    CREATE TABLE IF NOT EXISTS catalyst_entitlement (
        id TEXT PRIMARY KEY,
        subject_kind TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        resource JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalyst_entitlement_subject_idx ON catalyst_entitlement (subject_kind, subject_id, created_at ASC, id ASC)",
];

/// Creates every Catalyst table and index if missing.
///
/// # Errors
///
/// Returns an error if a DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> CatalystResult<()> {
    for statement in STATEMENTS {
        pool.execute(*statement).await.map_err(db_error)?;
    }
    tracing::debug!("catalyst schema ensured");
    Ok(())
}
