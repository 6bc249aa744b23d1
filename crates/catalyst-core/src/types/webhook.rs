//! Webhook subscriptions and deliveries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Retry behavior for a subscription's deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts before dead-lettering (including the first).
    pub max_attempts: u32,
    /// Backoff schedule in seconds; the last entry repeats.
    pub backoff_seconds: Vec<u64>,
    /// Optional sink for dead-lettered payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_uri: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: vec![30, 60, 120],
            dead_letter_uri: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff for the retry following a failed attempt.
    ///
    /// `attempt_count` is the number of attempts already made, including
    /// the one that just failed; the index clamps to the last entry.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt_count: u32) -> u64 {
        if self.backoff_seconds.is_empty() {
            return 0;
        }
        let index = (attempt_count.saturating_sub(1) as usize).min(self.backoff_seconds.len() - 1);
        self.backoff_seconds[index]
    }

    /// Whether another attempt is allowed after `attempt_count` attempts.
    #[must_use]
    pub fn may_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }
}

/// A standing registration of a target URL for event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    /// Subscription id.
    pub id: String,
    /// Restricts the subscription to one org's events when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Event types delivered; non-empty and deduplicated.
    pub event_types: Vec<String>,
    /// Delivery target.
    pub target_url: String,
    /// HMAC signing secret.
    pub secret: String,
    /// Extra headers sent with every delivery (overlaid by the
    /// `x-catalyst-*` headers).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Retry behavior.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Inactive subscriptions receive no new deliveries.
    pub active: bool,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Delivery lifecycle. `Succeeded` and `DeadLettered` are terminal;
/// `Delivering` is transient and must be left within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Scheduled for the worker.
    Pending,
    /// Claimed by a worker; an attempt is in flight.
    Delivering,
    /// The target acknowledged with a 2xx.
    Succeeded,
    /// A non-terminal failure (kept for observability between retries).
    Failed,
    /// Retry policy exhausted or the subscription vanished.
    DeadLettered,
}

impl DeliveryStatus {
    /// Returns `true` if no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered)
    }
}

/// The captured HTTP response of a delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body (possibly truncated by the worker).
    #[serde(default)]
    pub body: String,
}

/// One scheduled attempt chain delivering one event to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    /// Delivery id.
    pub id: String,
    /// Target subscription.
    pub subscription_id: String,
    /// The delivered event's id.
    pub event_id: String,
    /// Lifecycle status.
    pub status: DeliveryStatus,
    /// Attempts made so far; monotonic.
    pub attempt_count: u32,
    /// When the last attempt started.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
    /// Earliest instant the worker may pick this row up; `None` means
    /// immediately.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    /// The JSON payload POSTed to the target.
    pub payload: Value,
    /// Response captured from the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<DeliveryResponse>,
    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Input to delivery creation (one row per matching subscription).
#[derive(Debug, Clone)]
pub struct NewDelivery {
    /// Target subscription.
    pub subscription_id: String,
    /// Event id carried in the `x-catalyst-event-id` header.
    pub event_id: String,
    /// JSON payload.
    pub payload: Value,
    /// Earliest pickup instant; `None` for immediate.
    pub next_attempt_at: Option<OffsetDateTime>,
}

/// Input to subscription creation. The store assigns `id` and timestamps;
/// validation (non-empty deduped event types, URL shape) happens at the
/// SDK surface before this reaches a store.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Org scope, if any.
    pub org_id: Option<String>,
    /// Event types delivered.
    pub event_types: Vec<String>,
    /// Delivery target.
    pub target_url: String,
    /// HMAC signing secret.
    pub secret: String,
    /// Extra delivery headers.
    pub headers: BTreeMap<String, String>,
    /// Retry behavior; defaults when `None`.
    pub retry_policy: Option<RetryPolicy>,
    /// Whether the subscription starts active.
    pub active: bool,
    /// Free-form metadata.
    pub metadata: Option<Value>,
}

/// Partial update to a subscription; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    /// Replacement event types.
    pub event_types: Option<Vec<String>>,
    /// Replacement target URL.
    pub target_url: Option<String>,
    /// Replacement signing secret.
    pub secret: Option<String>,
    /// Replacement header map.
    pub headers: Option<BTreeMap<String, String>>,
    /// Replacement retry policy.
    pub retry_policy: Option<RetryPolicy>,
    /// Activate or deactivate.
    pub active: Option<bool>,
    /// Replacement metadata.
    pub metadata: Option<Value>,
}

/// A domain event published for webhook fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Event id.
    pub id: String,
    /// Event type matched against subscription `event_types`.
    pub event_type: String,
    /// Org the event belongs to, when scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// When the event occurred.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    /// Event payload.
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_index_clamps_to_last_entry() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_seconds: vec![30, 60, 120],
            dead_letter_uri: None,
        };
        assert_eq!(policy.backoff_for_attempt(1), 30);
        assert_eq!(policy.backoff_for_attempt(2), 60);
        assert_eq!(policy.backoff_for_attempt(3), 120);
        assert_eq!(policy.backoff_for_attempt(4), 120);
    }

    #[test]
    fn test_may_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.may_retry(1));
        assert!(policy.may_retry(2));
        assert!(!policy.may_retry(3));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Succeeded.is_terminal());
        assert!(DeliveryStatus::DeadLettered.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Delivering.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn test_empty_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_seconds: vec![],
            dead_letter_uri: None,
        };
        assert_eq!(policy.backoff_for_attempt(1), 0);
    }
}
