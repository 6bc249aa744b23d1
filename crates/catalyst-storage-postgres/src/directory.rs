//! Directory storage: profiles, orgs, groups, memberships, entitlements.
//!
//! These records follow the JSONB resource-column pattern: the full
//! record is stored as `resource`, with the columns needed for lookups
//! and uniqueness mirrored alongside it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;

use catalyst_core::{
    CatalystError, CatalystResult, Entitlement, Group, Membership, OrgProfile, SubjectKind,
    UserProfile,
};
use catalyst_storage::{EntitlementStore, GroupStore, MembershipStore, OrgStore, ProfileStore};

use crate::{PgPool, db_error, decode_error};

fn subject_kind_str(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::User => "user",
        SubjectKind::Org => "org",
        SubjectKind::Membership => "membership",
    }
}

fn decode<T: serde::de::DeserializeOwned>(context: &str, resource: Value) -> CatalystResult<T> {
    serde_json::from_value(resource).map_err(|e| decode_error(context, e))
}

/// PostgreSQL implementation of the five directory traits.
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    /// Creates a directory store over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PostgresDirectory {
    async fn upsert_profile(&self, profile: UserProfile) -> CatalystResult<UserProfile> {
        let resource =
            serde_json::to_value(&profile).map_err(|e| decode_error("profile", e))?;
        query(
            r#"
            INSERT INTO catalyst_profile (id, authentik_id, resource)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET authentik_id = EXCLUDED.authentik_id,
                resource = EXCLUDED.resource
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.authentik_id)
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return CatalystError::duplicate_id(format!(
                    "authentik id '{}' is already claimed",
                    profile.authentik_id
                ));
            }
            db_error(e)
        })?;
        Ok(profile)
    }

    async fn get_profile(&self, id: &str) -> CatalystResult<Option<UserProfile>> {
        let row: Option<(Value,)> =
            query_as("SELECT resource FROM catalyst_profile WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(db_error)?;
        row.map(|(resource,)| decode("profile", resource)).transpose()
    }

    async fn get_profile_by_authentik_id(
        &self,
        authentik_id: &str,
    ) -> CatalystResult<Option<UserProfile>> {
        let row: Option<(Value,)> =
            query_as("SELECT resource FROM catalyst_profile WHERE authentik_id = $1")
                .bind(authentik_id)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(db_error)?;
        row.map(|(resource,)| decode("profile", resource)).transpose()
    }
}

#[async_trait]
impl OrgStore for PostgresDirectory {
    async fn upsert_org(&self, org: OrgProfile) -> CatalystResult<OrgProfile> {
        let resource = serde_json::to_value(&org).map_err(|e| decode_error("org", e))?;
        query(
            r#"
            INSERT INTO catalyst_org (id, slug, resource)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET slug = EXCLUDED.slug,
                resource = EXCLUDED.resource
            "#,
        )
        .bind(&org.id)
        .bind(&org.slug)
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return CatalystError::duplicate_id(format!(
                    "org slug '{}' is already claimed",
                    org.slug
                ));
            }
            db_error(e)
        })?;
        Ok(org)
    }

    async fn get_org(&self, id: &str) -> CatalystResult<Option<OrgProfile>> {
        let row: Option<(Value,)> = query_as("SELECT resource FROM catalyst_org WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        row.map(|(resource,)| decode("org", resource)).transpose()
    }

    async fn get_org_by_slug(&self, slug: &str) -> CatalystResult<Option<OrgProfile>> {
        let row: Option<(Value,)> = query_as("SELECT resource FROM catalyst_org WHERE slug = $1")
            .bind(slug)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        row.map(|(resource,)| decode("org", resource)).transpose()
    }
}

#[async_trait]
impl GroupStore for PostgresDirectory {
    async fn upsert_group(&self, group: Group) -> CatalystResult<Group> {
        let resource = serde_json::to_value(&group).map_err(|e| decode_error("group", e))?;
        query(
            r#"
            INSERT INTO catalyst_group (id, org_id, resource)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET org_id = EXCLUDED.org_id,
                resource = EXCLUDED.resource
            "#,
        )
        .bind(&group.id)
        .bind(&group.org_id)
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> CatalystResult<Option<Group>> {
        let row: Option<(Value,)> = query_as("SELECT resource FROM catalyst_group WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        row.map(|(resource,)| decode("group", resource)).transpose()
    }

    async fn get_groups(&self, ids: &[String]) -> CatalystResult<Vec<Group>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String, Value)> = query_as(
            "SELECT id, resource FROM catalyst_group WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        // Preserve the caller's id order; missing ids are skipped.
        let mut by_id: std::collections::HashMap<String, Value> = rows.into_iter().collect();
        let mut groups = Vec::new();
        for id in ids {
            if let Some(resource) = by_id.remove(id) {
                groups.push(decode("group", resource)?);
            }
        }
        Ok(groups)
    }

    async fn list_groups_by_org(&self, org_id: &str) -> CatalystResult<Vec<Group>> {
        let rows: Vec<(Value,)> = query_as(
            "SELECT resource FROM catalyst_group WHERE org_id = $1 ORDER BY id ASC",
        )
        .bind(org_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter()
            .map(|(resource,)| decode("group", resource))
            .collect()
    }
}

#[async_trait]
impl MembershipStore for PostgresDirectory {
    async fn upsert_membership(&self, membership: Membership) -> CatalystResult<Membership> {
        let resource =
            serde_json::to_value(&membership).map_err(|e| decode_error("membership", e))?;
        query(
            r#"
            INSERT INTO catalyst_membership (id, user_id, org_id, created_at, resource)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                org_id = EXCLUDED.org_id,
                created_at = EXCLUDED.created_at,
                resource = EXCLUDED.resource
            "#,
        )
        .bind(&membership.id)
        .bind(&membership.user_id)
        .bind(&membership.org_id)
        .bind(membership.created_at)
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        Ok(membership)
    }

    async fn get_membership(&self, id: &str) -> CatalystResult<Option<Membership>> {
        let row: Option<(Value,)> =
            query_as("SELECT resource FROM catalyst_membership WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(db_error)?;
        row.map(|(resource,)| decode("membership", resource)).transpose()
    }

    async fn find_membership_for_user_and_org(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> CatalystResult<Option<Membership>> {
        let row: Option<(Value,)> = query_as(
            r#"
            SELECT resource FROM catalyst_membership
            WHERE user_id = $1 AND org_id = $2
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(|(resource,)| decode("membership", resource)).transpose()
    }

    async fn list_memberships_for_user(&self, user_id: &str) -> CatalystResult<Vec<Membership>> {
        let rows: Vec<(Value,)> = query_as(
            r#"
            SELECT resource FROM catalyst_membership
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter()
            .map(|(resource,)| decode("membership", resource))
            .collect()
    }
}

#[async_trait]
impl EntitlementStore for PostgresDirectory {
    async fn grant_entitlement(&self, entitlement: Entitlement) -> CatalystResult<Entitlement> {
        let resource =
            serde_json::to_value(&entitlement).map_err(|e| decode_error("entitlement", e))?;
        query(
            r#"
            INSERT INTO catalyst_entitlement (id, subject_kind, subject_id, created_at, resource)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entitlement.id)
        .bind(subject_kind_str(entitlement.subject_kind))
        .bind(&entitlement.subject_id)
        .bind(entitlement.created_at)
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return CatalystError::duplicate_id(format!(
                    "entitlement '{}' already exists",
                    entitlement.id
                ));
            }
            db_error(e)
        })?;
        Ok(entitlement)
    }

    async fn revoke_entitlement(&self, id: &str) -> CatalystResult<bool> {
        let result = query("DELETE FROM catalyst_entitlement WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_entitlements_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: &str,
    ) -> CatalystResult<Vec<Entitlement>> {
        let rows: Vec<(Value,)> = query_as(
            r#"
            SELECT resource FROM catalyst_entitlement
            WHERE subject_kind = $1 AND subject_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(subject_kind_str(kind))
        .bind(subject_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter()
            .map(|(resource,)| decode("entitlement", resource))
            .collect()
    }
}
