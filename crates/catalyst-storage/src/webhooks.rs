//! Webhook subscription and delivery storage traits.
//!
//! The delivery store doubles as the worker's work queue. The transition
//! from `pending` to `delivering` is the critical section for multi-worker
//! deployments: implementations must make [`DeliveryStore::claim_delivery`]
//! conditional on the prior status (compare-and-set, or
//! `UPDATE … WHERE status = 'pending' RETURNING *` in SQL).

use async_trait::async_trait;
use time::OffsetDateTime;

use catalyst_core::{
    CatalystResult, DeliveryResponse, NewDelivery, NewSubscription, SubscriptionUpdate,
    WebhookDelivery, WebhookSubscription,
};

/// Storage trait for webhook subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Creates a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails. Input validation
    /// (non-empty event types, URL shape) happens at the SDK surface.
    async fn create_subscription(
        &self,
        input: NewSubscription,
    ) -> CatalystResult<WebhookSubscription>;

    /// Looks a subscription up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_subscription(&self, id: &str) -> CatalystResult<Option<WebhookSubscription>>;

    /// Applies a partial update; `None` fields are untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the subscription does not exist.
    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> CatalystResult<WebhookSubscription>;

    /// Deletes a subscription. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_subscription(&self, id: &str) -> CatalystResult<bool>;

    /// Lists active subscriptions whose `event_types` contain
    /// `event_type` and whose org scope (when set) matches `org_id`.
    ///
    /// An unscoped subscription matches events from every org.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_matching_subscriptions(
        &self,
        event_type: &str,
        org_id: Option<&str>,
    ) -> CatalystResult<Vec<WebhookSubscription>>;

    /// Lists all subscriptions. Operator surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_subscriptions(&self) -> CatalystResult<Vec<WebhookSubscription>>;
}

/// Storage trait for webhook deliveries (the worker's queue).
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Creates a `pending` delivery row.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn create_delivery(&self, input: NewDelivery) -> CatalystResult<WebhookDelivery>;

    /// Looks a delivery up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_delivery(&self, id: &str) -> CatalystResult<Option<WebhookDelivery>>;

    /// Lists rows with `status ∈ {pending, delivering}` and
    /// `next_attempt_at` unset or `<= before` (inclusive), ordered
    /// `next_attempt_at ASC NULLS FIRST, created_at ASC`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_pending_deliveries(
        &self,
        before: OffsetDateTime,
        limit: usize,
    ) -> CatalystResult<Vec<WebhookDelivery>>;

    /// Atomically claims a `pending` row for an attempt: sets
    /// `status = delivering`, `attempt_count += 1`, `last_attempt_at =
    /// now`, and clears `next_attempt_at`/`error_message`.
    ///
    /// Returns `None` when the row is not claimable (missing, or not
    /// `pending` because another worker got there first).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn claim_delivery(
        &self,
        id: &str,
        now: OffsetDateTime,
    ) -> CatalystResult<Option<WebhookDelivery>>;

    /// Transitions a claimed row to `succeeded`, capturing the response
    /// and clearing `next_attempt_at`/`error_message`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the delivery does not exist.
    async fn mark_delivery_succeeded(
        &self,
        id: &str,
        response: DeliveryResponse,
    ) -> CatalystResult<WebhookDelivery>;

    /// Transitions a claimed row back to `pending` with a future
    /// `next_attempt_at`, recording the failure.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the delivery does not exist.
    async fn schedule_delivery_retry(
        &self,
        id: &str,
        next_attempt_at: OffsetDateTime,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery>;

    /// Transitions a row to `dead_lettered`, recording the terminal
    /// failure and clearing `next_attempt_at`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the delivery does not exist.
    async fn mark_delivery_dead_lettered(
        &self,
        id: &str,
        error_message: &str,
        response: Option<DeliveryResponse>,
    ) -> CatalystResult<WebhookDelivery>;

    /// Returns `delivering` rows whose last attempt started before
    /// `older_than` to `pending`, making them eligible again. Run at
    /// worker startup so `delivering` is never a silent terminal state.
    ///
    /// Returns the number of rows released.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn release_stale_deliveries(&self, older_than: OffsetDateTime) -> CatalystResult<u64>;
}
