//! Webhook subscription and delivery storage.
//!
//! The delivery claim is the conditional update
//! `UPDATE … WHERE id = $1 AND status = 'pending' RETURNING …`, which is
//! a sufficient multi-worker claim on its own: a second worker's update
//! matches zero rows and reads as "already claimed".

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use catalyst_core::{
    CatalystError, CatalystResult, DeliveryResponse, DeliveryStatus, NewDelivery,
    NewSubscription, RetryPolicy, SubscriptionUpdate, WebhookDelivery, WebhookSubscription,
};
use catalyst_storage::{DeliveryStore, SubscriptionStore};

use crate::{PgPool, db_error, decode_error};

// =============================================================================
// Subscriptions
// =============================================================================

type SubscriptionTuple = (
    String,                 // id
    Option<String>,         // org_id
    Value,                  // event_types
    String,                 // target_url
    String,                 // secret
    Value,                  // headers
    Value,                  // retry_policy
    bool,                   // active
    OffsetDateTime,         // created_at
    OffsetDateTime,         // updated_at
    Option<Value>,          // metadata
);

const SUBSCRIPTION_COLUMNS: &str = "id, org_id, event_types, target_url, secret, headers, \
     retry_policy, active, created_at, updated_at, metadata";

fn subscription_from_tuple(row: SubscriptionTuple) -> CatalystResult<WebhookSubscription> {
    let event_types: Vec<String> =
        serde_json::from_value(row.2).map_err(|e| decode_error("subscription", e))?;
    let headers: BTreeMap<String, String> =
        serde_json::from_value(row.5).map_err(|e| decode_error("subscription", e))?;
    let retry_policy: RetryPolicy =
        serde_json::from_value(row.6).map_err(|e| decode_error("subscription", e))?;
    Ok(WebhookSubscription {
        id: row.0,
        org_id: row.1,
        event_types,
        target_url: row.3,
        secret: row.4,
        headers,
        retry_policy,
        active: row.7,
        created_at: row.8,
        updated_at: row.9,
        metadata: row.10,
    })
}

// =============================================================================
// Deliveries
// =============================================================================

type DeliveryTuple = (
    String,                 // id
    String,                 // subscription_id
    String,                 // event_id
    String,                 // status
    i64,                    // attempt_count
    Option<OffsetDateTime>, // last_attempt_at
    Option<OffsetDateTime>, // next_attempt_at
    Value,                  // payload
    Option<Value>,          // response
    Option<String>,         // error_message
    OffsetDateTime,         // created_at
    OffsetDateTime,         // updated_at
);

const DELIVERY_COLUMNS: &str = "id, subscription_id, event_id, status, attempt_count, \
     last_attempt_at, next_attempt_at, payload, response, error_message, created_at, updated_at";

fn status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Delivering => "delivering",
        DeliveryStatus::Succeeded => "succeeded",
        DeliveryStatus::Failed => "failed",
        DeliveryStatus::DeadLettered => "dead_lettered",
    }
}

fn parse_status(raw: &str) -> CatalystResult<DeliveryStatus> {
    match raw {
        "pending" => Ok(DeliveryStatus::Pending),
        "delivering" => Ok(DeliveryStatus::Delivering),
        "succeeded" => Ok(DeliveryStatus::Succeeded),
        "failed" => Ok(DeliveryStatus::Failed),
        "dead_lettered" => Ok(DeliveryStatus::DeadLettered),
        other => Err(CatalystError::storage(format!(
            "unknown delivery status '{other}'"
        ))),
    }
}

fn delivery_from_tuple(row: DeliveryTuple) -> CatalystResult<WebhookDelivery> {
    let response: Option<DeliveryResponse> = row
        .8
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| decode_error("delivery", e))?;
    Ok(WebhookDelivery {
        id: row.0,
        subscription_id: row.1,
        event_id: row.2,
        status: parse_status(&row.3)?,
        attempt_count: row.4.max(0) as u32,
        last_attempt_at: row.5,
        next_attempt_at: row.6,
        payload: row.7,
        response,
        error_message: row.9,
        created_at: row.10,
        updated_at: row.11,
    })
}

/// PostgreSQL [`SubscriptionStore`] and [`DeliveryStore`].
pub struct PostgresWebhookStore {
    pool: Arc<PgPool>,
}

impl PostgresWebhookStore {
    /// Creates a webhook store over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresWebhookStore {
    async fn create_subscription(
        &self,
        input: NewSubscription,
    ) -> CatalystResult<WebhookSubscription> {
        let id = Uuid::new_v4().to_string();
        let event_types = serde_json::to_value(&input.event_types)
            .map_err(|e| decode_error("subscription", e))?;
        let headers =
            serde_json::to_value(&input.headers).map_err(|e| decode_error("subscription", e))?;
        let retry_policy = serde_json::to_value(input.retry_policy.unwrap_or_default())
            .map_err(|e| decode_error("subscription", e))?;

        let row: SubscriptionTuple = query_as(&format!(
            r#"
            INSERT INTO catalyst_subscription
                (id, org_id, event_types, target_url, secret, headers, retry_policy, active, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&input.org_id)
        .bind(&event_types)
        .bind(&input.target_url)
        .bind(&input.secret)
        .bind(&headers)
        .bind(&retry_policy)
        .bind(input.active)
        .bind(&input.metadata)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        subscription_from_tuple(row)
    }

    async fn get_subscription(&self, id: &str) -> CatalystResult<Option<WebhookSubscription>> {
        let row: Option<SubscriptionTuple> = query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM catalyst_subscription WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(subscription_from_tuple).transpose()
    }

    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> CatalystResult<WebhookSubscription> {
        let event_types = update
            .event_types
            .map(|v| serde_json::to_value(v).map_err(|e| decode_error("subscription", e)))
            .transpose()?;
        let headers = update
            .headers
            .map(|v| serde_json::to_value(v).map_err(|e| decode_error("subscription", e)))
            .transpose()?;
        let retry_policy = update
            .retry_policy
            .map(|v| serde_json::to_value(v).map_err(|e| decode_error("subscription", e)))
            .transpose()?;

        let row: Option<SubscriptionTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_subscription
            SET event_types = COALESCE($2, event_types),
                target_url = COALESCE($3, target_url),
                secret = COALESCE($4, secret),
                headers = COALESCE($5, headers),
                retry_policy = COALESCE($6, retry_policy),
                active = COALESCE($7, active),
                metadata = COALESCE($8, metadata),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&event_types)
        .bind(&update.target_url)
        .bind(&update.secret)
        .bind(&headers)
        .bind(&retry_policy)
        .bind(update.active)
        .bind(&update.metadata)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(subscription_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("webhook subscription {id}")))
    }

    async fn delete_subscription(&self, id: &str) -> CatalystResult<bool> {
        let result = query("DELETE FROM catalyst_subscription WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_matching_subscriptions(
        &self,
        event_type: &str,
        org_id: Option<&str>,
    ) -> CatalystResult<Vec<WebhookSubscription>> {
        let rows: Vec<SubscriptionTuple> = query_as(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM catalyst_subscription
            WHERE active
              AND event_types @> to_jsonb(ARRAY[$1::text])
              AND (org_id IS NULL OR org_id = $2)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(event_type)
        .bind(org_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter().map(subscription_from_tuple).collect()
    }

    async fn list_subscriptions(&self) -> CatalystResult<Vec<WebhookSubscription>> {
        let rows: Vec<SubscriptionTuple> = query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM catalyst_subscription ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter().map(subscription_from_tuple).collect()
    }
}

#[async_trait]
impl DeliveryStore for PostgresWebhookStore {
    async fn create_delivery(&self, input: NewDelivery) -> CatalystResult<WebhookDelivery> {
        let id = Uuid::new_v4().to_string();
        let row: DeliveryTuple = query_as(&format!(
            r#"
            INSERT INTO catalyst_delivery (id, subscription_id, event_id, payload, next_attempt_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&input.subscription_id)
        .bind(&input.event_id)
        .bind(&input.payload)
        .bind(input.next_attempt_at)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        delivery_from_tuple(row)
    }

    async fn get_delivery(&self, id: &str) -> CatalystResult<Option<WebhookDelivery>> {
        let row: Option<DeliveryTuple> = query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM catalyst_delivery WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(delivery_from_tuple).transpose()
    }

    async fn list_pending_deliveries(
        &self,
        before: OffsetDateTime,
        limit: usize,
    ) -> CatalystResult<Vec<WebhookDelivery>> {
        let rows: Vec<DeliveryTuple> = query_as(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM catalyst_delivery
            WHERE status IN ('pending', 'delivering')
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY next_attempt_at ASC NULLS FIRST, created_at ASC
            LIMIT $2
            "#
        ))
        .bind(before)
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        rows.into_iter().map(delivery_from_tuple).collect()
    }

    async fn claim_delivery(
        &self,
        id: &str,
        now: OffsetDateTime,
    ) -> CatalystResult<Option<WebhookDelivery>> {
        let row: Option<DeliveryTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_delivery
            SET status = 'delivering',
                attempt_count = attempt_count + 1,
                last_attempt_at = $2,
                next_attempt_at = NULL,
                error_message = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        row.map(delivery_from_tuple).transpose()
    }

    async fn mark_delivery_succeeded(
        &self,
        id: &str,
        response: DeliveryResponse,
    ) -> CatalystResult<WebhookDelivery> {
        let response =
            serde_json::to_value(&response).map_err(|e| decode_error("delivery", e))?;
        let row: Option<DeliveryTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_delivery
            SET status = 'succeeded',
                response = $2,
                error_message = NULL,
                next_attempt_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&response)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(delivery_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))
    }

    async fn schedule_delivery_retry(
        &self,
        id: &str,
        next_attempt_at: OffsetDateTime,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery> {
        let response = response
            .map(|r| serde_json::to_value(&r).map_err(|e| decode_error("delivery", e)))
            .transpose()?;
        let row: Option<DeliveryTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_delivery
            SET status = 'pending',
                next_attempt_at = $2,
                error_message = $3,
                response = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(next_attempt_at)
        .bind(error_message)
        .bind(&response)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(delivery_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))
    }

    async fn mark_delivery_dead_lettered(
        &self,
        id: &str,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery> {
        let response = response
            .map(|r| serde_json::to_value(&r).map_err(|e| decode_error("delivery", e)))
            .transpose()?;
        let row: Option<DeliveryTuple> = query_as(&format!(
            r#"
            UPDATE catalyst_delivery
            SET status = 'dead_lettered',
                next_attempt_at = NULL,
                error_message = $2,
                response = COALESCE($3, response),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error_message)
        .bind(&response)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        row.map(delivery_from_tuple)
            .transpose()?
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))
    }

    async fn release_stale_deliveries(&self, older_than: OffsetDateTime) -> CatalystResult<u64> {
        let result = query(
            r#"
            UPDATE catalyst_delivery
            SET status = 'pending',
                next_attempt_at = NULL,
                updated_at = NOW()
            WHERE status = 'delivering'
              AND last_attempt_at < $1
            "#,
        )
        .bind(older_than)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
