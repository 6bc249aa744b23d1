//! In-memory webhook subscription and delivery stores.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use catalyst_core::{
    CatalystError, CatalystResult, DeliveryResponse, DeliveryStatus, NewDelivery,
    NewSubscription, SubscriptionUpdate, WebhookDelivery, WebhookSubscription,
};

use crate::webhooks::{DeliveryStore, SubscriptionStore};

/// In-memory implementation of [`SubscriptionStore`] and [`DeliveryStore`].
///
/// The delivery claim takes the single write lock, which gives the same
/// at-most-once claim the SQL adapter gets from its conditional update.
#[derive(Default)]
pub struct MemoryWebhookStore {
    subscriptions: RwLock<HashMap<String, WebhookSubscription>>,
    deliveries: RwLock<HashMap<String, WebhookDelivery>>,
}

impl MemoryWebhookStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryWebhookStore {
    async fn create_subscription(
        &self,
        input: NewSubscription,
    ) -> CatalystResult<WebhookSubscription> {
        let now = OffsetDateTime::now_utc();
        let subscription = WebhookSubscription {
            id: Uuid::new_v4().to_string(),
            org_id: input.org_id,
            event_types: input.event_types,
            target_url: input.target_url,
            secret: input.secret,
            headers: input.headers,
            retry_policy: input.retry_policy.unwrap_or_default(),
            active: input.active,
            created_at: now,
            updated_at: now,
            metadata: input.metadata,
        };
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(&self, id: &str) -> CatalystResult<Option<WebhookSubscription>> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> CatalystResult<WebhookSubscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("webhook subscription {id}")))?;

        if let Some(event_types) = update.event_types {
            subscription.event_types = event_types;
        }
        if let Some(target_url) = update.target_url {
            subscription.target_url = target_url;
        }
        if let Some(secret) = update.secret {
            subscription.secret = secret;
        }
        if let Some(headers) = update.headers {
            subscription.headers = headers;
        }
        if let Some(retry_policy) = update.retry_policy {
            subscription.retry_policy = retry_policy;
        }
        if let Some(active) = update.active {
            subscription.active = active;
        }
        if let Some(metadata) = update.metadata {
            subscription.metadata = Some(metadata);
        }
        subscription.updated_at = OffsetDateTime::now_utc();
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, id: &str) -> CatalystResult<bool> {
        Ok(self.subscriptions.write().await.remove(id).is_some())
    }

    async fn list_matching_subscriptions(
        &self,
        event_type: &str,
        org_id: Option<&str>,
    ) -> CatalystResult<Vec<WebhookSubscription>> {
        let mut matched: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| {
                s.active
                    && s.event_types.iter().any(|t| t == event_type)
                    && s.org_id
                        .as_deref()
                        .is_none_or(|scope| Some(scope) == org_id)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn list_subscriptions(&self) -> CatalystResult<Vec<WebhookSubscription>> {
        let mut all: Vec<WebhookSubscription> =
            self.subscriptions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}

#[async_trait]
impl DeliveryStore for MemoryWebhookStore {
    async fn create_delivery(&self, input: NewDelivery) -> CatalystResult<WebhookDelivery> {
        let now = OffsetDateTime::now_utc();
        let delivery = WebhookDelivery {
            id: Uuid::new_v4().to_string(),
            subscription_id: input.subscription_id,
            event_id: input.event_id,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_attempt_at: input.next_attempt_at,
            payload: input.payload,
            response: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.deliveries
            .write()
            .await
            .insert(delivery.id.clone(), delivery.clone());
        Ok(delivery)
    }

    async fn get_delivery(&self, id: &str) -> CatalystResult<Option<WebhookDelivery>> {
        Ok(self.deliveries.read().await.get(id).cloned())
    }

    async fn list_pending_deliveries(
        &self,
        before: OffsetDateTime,
        limit: usize,
    ) -> CatalystResult<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        let mut due: Vec<WebhookDelivery> = deliveries
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DeliveryStatus::Pending | DeliveryStatus::Delivering
                ) && d.next_attempt_at.is_none_or(|at| at <= before)
            })
            .cloned()
            .collect();
        // next_attempt_at ASC NULLS FIRST, created_at ASC
        due.sort_by(|a, b| {
            match (a.next_attempt_at, b.next_attempt_at) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            }
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_delivery(
        &self,
        id: &str,
        now: OffsetDateTime,
    ) -> CatalystResult<Option<WebhookDelivery>> {
        let mut deliveries = self.deliveries.write().await;
        let Some(delivery) = deliveries.get_mut(id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Pending {
            return Ok(None);
        }

        delivery.status = DeliveryStatus::Delivering;
        delivery.attempt_count += 1;
        delivery.last_attempt_at = Some(now);
        delivery.next_attempt_at = None;
        delivery.error_message = None;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn mark_delivery_succeeded(
        &self,
        id: &str,
        response: DeliveryResponse,
    ) -> CatalystResult<WebhookDelivery> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))?;

        delivery.status = DeliveryStatus::Succeeded;
        delivery.response = Some(response);
        delivery.error_message = None;
        delivery.next_attempt_at = None;
        delivery.updated_at = OffsetDateTime::now_utc();
        Ok(delivery.clone())
    }

    async fn schedule_delivery_retry(
        &self,
        id: &str,
        next_attempt_at: OffsetDateTime,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))?;

        delivery.status = DeliveryStatus::Pending;
        delivery.next_attempt_at = Some(next_attempt_at);
        delivery.error_message = Some(error_message.to_string());
        delivery.response = response;
        delivery.updated_at = OffsetDateTime::now_utc();
        Ok(delivery.clone())
    }

    async fn mark_delivery_dead_lettered(
        &self,
        id: &str,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("webhook delivery {id}")))?;

        delivery.status = DeliveryStatus::DeadLettered;
        delivery.next_attempt_at = None;
        delivery.error_message = Some(error_message.to_string());
        if response.is_some() {
            delivery.response = response;
        }
        delivery.updated_at = OffsetDateTime::now_utc();
        Ok(delivery.clone())
    }

    async fn release_stale_deliveries(&self, older_than: OffsetDateTime) -> CatalystResult<u64> {
        let mut deliveries = self.deliveries.write().await;
        let mut released = 0;
        for delivery in deliveries.values_mut() {
            if delivery.status == DeliveryStatus::Delivering
                && delivery.last_attempt_at.is_some_and(|at| at < older_than)
            {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_attempt_at = None;
                delivery.updated_at = OffsetDateTime::now_utc();
                released += 1;
            }
        }
        Ok(released)
    }
}
