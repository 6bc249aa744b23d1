//! Event fan-out: one pending delivery per matching subscription.

use std::sync::Arc;

use serde_json::json;

use catalyst_core::{CatalystResult, NewDelivery, WebhookDelivery, WebhookEvent};
use catalyst_storage::{DeliveryStore, SubscriptionStore};

/// Fans domain events out into delivery rows for the worker.
pub struct WebhookDispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl WebhookDispatcher {
    /// Creates a dispatcher over the webhook stores.
    #[must_use]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
        }
    }

    /// Creates one `pending` delivery per active subscription matching
    /// the event's type and org scope. Returns the created rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription listing or a delivery insert
    /// fails.
    pub async fn dispatch(&self, event: &WebhookEvent) -> CatalystResult<Vec<WebhookDelivery>> {
        let matching = self
            .subscriptions
            .list_matching_subscriptions(&event.event_type, event.org_id.as_deref())
            .await?;

        let payload = json!({
            "id": event.id,
            "type": event.event_type,
            "orgId": event.org_id,
            "occurredAt": event.occurred_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            "data": event.data,
        });

        let mut created = Vec::with_capacity(matching.len());
        for subscription in matching {
            let delivery = self
                .deliveries
                .create_delivery(NewDelivery {
                    subscription_id: subscription.id.clone(),
                    event_id: event.id.clone(),
                    payload: payload.clone(),
                    next_attempt_at: None,
                })
                .await?;
            created.push(delivery);
        }

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            deliveries = created.len(),
            "webhook event dispatched"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_core::{DeliveryStatus, NewSubscription};
    use catalyst_storage::MemoryWebhookStore;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn subscription(event_types: &[&str], org_id: Option<&str>) -> NewSubscription {
        NewSubscription {
            org_id: org_id.map(String::from),
            event_types: event_types.iter().map(ToString::to_string).collect(),
            target_url: "https://hooks.example.com/in".into(),
            secret: "whsec".into(),
            headers: BTreeMap::new(),
            retry_policy: None,
            active: true,
            metadata: None,
        }
    }

    fn event(event_type: &str, org_id: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            id: "evt-1".into(),
            event_type: event_type.into(),
            org_id: org_id.map(String::from),
            occurred_at: OffsetDateTime::now_utc(),
            data: serde_json::json!({"keyId": "key-1"}),
        }
    }

    #[tokio::test]
    async fn test_dispatch_creates_one_row_per_match() {
        let store = Arc::new(MemoryWebhookStore::new());
        store
            .create_subscription(subscription(&["key.revoked"], None))
            .await
            .unwrap();
        store
            .create_subscription(subscription(&["key.revoked"], Some("org-1")))
            .await
            .unwrap();
        store
            .create_subscription(subscription(&["user.created"], None))
            .await
            .unwrap();

        let dispatcher = WebhookDispatcher::new(store.clone(), store.clone());
        let created = dispatcher
            .dispatch(&event("key.revoked", Some("org-1")))
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        for delivery in &created {
            assert_eq!(delivery.status, DeliveryStatus::Pending);
            assert_eq!(delivery.event_id, "evt-1");
            assert_eq!(delivery.payload["type"], "key.revoked");
            assert!(delivery.next_attempt_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_matches_creates_nothing() {
        let store = Arc::new(MemoryWebhookStore::new());
        let dispatcher = WebhookDispatcher::new(store.clone(), store.clone());
        let created = dispatcher.dispatch(&event("key.revoked", None)).await.unwrap();
        assert!(created.is_empty());
    }
}
