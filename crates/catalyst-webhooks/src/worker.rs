//! The delivery worker.
//!
//! Advances every delivery row toward a terminal state:
//!
//! ```text
//! pending ──claim──▶ delivering ──2xx──▶ succeeded
//!                        │
//!                        ├── failure, attempts left ──▶ pending (backoff)
//!                        └── failure, exhausted ──────▶ dead_lettered
//! ```
//!
//! The claim is the store's critical section; a row whose claim loses is
//! skipped, never attempted twice. On startup the worker sweeps stale
//! `delivering` rows (from crashed or cancelled attempts) back to
//! `pending` so that state is never silently terminal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use catalyst_core::{
    CatalystResult, DeliveryResponse, WebhookDelivery, WebhookSubscription,
};
use catalyst_storage::{DeliveryStore, SubscriptionStore};

type HmacSha256 = Hmac<Sha256>;

/// Worker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum rows fetched per poll.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Timeout for the webhook POST, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// `delivering` rows older than this are swept back to `pending`.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
    /// Captured response bodies are truncated to this many bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_batch_limit() -> usize {
    25
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_stale_after_seconds() -> u64 {
    300
}

fn default_max_response_bytes() -> usize {
    16 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            stale_after_seconds: default_stale_after_seconds(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

/// Counters for one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Rows picked up this pass.
    pub total: u64,
    /// Rows that reached `succeeded`.
    pub succeeded: u64,
    /// Rows rescheduled for a later attempt.
    pub retried: u64,
    /// Rows that reached `dead_lettered`.
    pub dead_lettered: u64,
}

enum AttemptOutcome {
    Success(DeliveryResponse),
    Failure {
        error: String,
        response: Option<DeliveryResponse>,
    },
}

/// Polls pending deliveries and executes signed webhook POSTs.
pub struct DeliveryWorker {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    http: reqwest::Client,
    config: WorkerConfig,
}

impl DeliveryWorker {
    /// Creates a worker over the webhook stores.
    #[must_use]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Sweeps stale `delivering` rows back to `pending`. Run at startup
    /// and periodically from the poll loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn sweep_stale(&self) -> CatalystResult<u64> {
        let cutoff = OffsetDateTime::now_utc()
            - time::Duration::seconds(self.config.stale_after_seconds as i64);
        let released = self.deliveries.release_stale_deliveries(cutoff).await?;
        if released > 0 {
            tracing::warn!(released, "released stale delivering rows back to pending");
        }
        Ok(released)
    }

    /// Runs the poll loop until the task is aborted.
    pub async fn run(&self, poll_interval: Duration) {
        if let Err(error) = self.sweep_stale().await {
            tracing::error!(error = %error, "startup sweep failed");
        }

        let mut ticker = tokio::time::interval(poll_interval);
        tracing::info!(interval_ms = poll_interval.as_millis() as u64, "delivery worker started");
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(summary) if summary.total > 0 => {
                    tracing::info!(
                        total = summary.total,
                        succeeded = summary.succeeded,
                        retried = summary.retried,
                        dead_lettered = summary.dead_lettered,
                        "delivery pass finished"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(error = %error, "delivery pass failed");
                }
            }
        }
    }

    /// Processes one batch of due deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures; attempt failures become
    /// retry decisions and are reflected in the summary instead.
    pub async fn run_once(&self) -> CatalystResult<RunSummary> {
        let now = OffsetDateTime::now_utc();
        let due = self
            .deliveries
            .list_pending_deliveries(now, self.config.batch_limit)
            .await?;

        let mut summary = RunSummary {
            total: due.len() as u64,
            ..RunSummary::default()
        };

        for row in due {
            let subscription = self.subscriptions.get_subscription(&row.subscription_id).await?;
            let Some(subscription) = subscription else {
                self.deliveries
                    .mark_delivery_dead_lettered(&row.id, "Webhook subscription not found.", None)
                    .await?;
                summary.dead_lettered += 1;
                continue;
            };

            // Claim: loses quietly when another worker got the row.
            let Some(claimed) = self
                .deliveries
                .claim_delivery(&row.id, OffsetDateTime::now_utc())
                .await?
            else {
                continue;
            };

            match self.attempt(&claimed, &subscription).await {
                AttemptOutcome::Success(response) => {
                    self.deliveries
                        .mark_delivery_succeeded(&claimed.id, response)
                        .await?;
                    summary.succeeded += 1;
                }
                AttemptOutcome::Failure { error, response } => {
                    if subscription.retry_policy.may_retry(claimed.attempt_count) {
                        let backoff = subscription
                            .retry_policy
                            .backoff_for_attempt(claimed.attempt_count);
                        let next = OffsetDateTime::now_utc()
                            + time::Duration::seconds(backoff as i64);
                        self.deliveries
                            .schedule_delivery_retry(&claimed.id, next, &error, response)
                            .await?;
                        summary.retried += 1;
                        tracing::warn!(
                            delivery_id = %claimed.id,
                            attempt = claimed.attempt_count,
                            backoff_seconds = backoff,
                            error = %error,
                            "delivery attempt failed; retry scheduled"
                        );
                    } else {
                        self.deliveries
                            .mark_delivery_dead_lettered(&claimed.id, &error, response)
                            .await?;
                        summary.dead_lettered += 1;
                        tracing::warn!(
                            delivery_id = %claimed.id,
                            attempts = claimed.attempt_count,
                            error = %error,
                            "delivery dead-lettered"
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn attempt(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
    ) -> AttemptOutcome {
        let body = match serde_json::to_string(&delivery.payload) {
            Ok(body) => body,
            Err(error) => {
                return AttemptOutcome::Failure {
                    error: format!("payload serialization failed: {error}"),
                    response: None,
                };
            }
        };
        let signature = sign_payload(&subscription.secret, &body);

        let mut request = self
            .http
            .post(&subscription.target_url)
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .header("content-type", "application/json");
        for (name, value) in &subscription.headers {
            request = request.header(name, value);
        }
        request = request
            .header("x-catalyst-event-id", &delivery.event_id)
            .header("x-catalyst-subscription-id", &subscription.id)
            .header("x-catalyst-attempt", delivery.attempt_count.to_string())
            .header("x-catalyst-signature", format!("sha256={signature}"));

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(error) => {
                return AttemptOutcome::Failure {
                    error: format!("request failed: {error}"),
                    response: None,
                };
            }
        };

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > self.config.max_response_bytes {
            let mut cut = self.config.max_response_bytes;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        let captured = DeliveryResponse {
            status: status.as_u16(),
            headers,
            body,
        };
        if status.is_success() {
            AttemptOutcome::Success(captured)
        } else {
            AttemptOutcome::Failure {
                error: format!("HTTP {}", status.as_u16()),
                response: Some(captured),
            }
        }
    }
}

/// HMAC-SHA256 hex signature of the raw body, keyed with the
/// subscription secret.
#[must_use]
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_core::{DeliveryStatus, NewDelivery, NewSubscription, RetryPolicy};
    use catalyst_storage::MemoryWebhookStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn subscription_for(
        store: &MemoryWebhookStore,
        server: &MockServer,
        retry_policy: RetryPolicy,
    ) -> String {
        store
            .create_subscription(NewSubscription {
                org_id: None,
                event_types: vec!["key.revoked".into()],
                target_url: format!("{}/hook", server.uri()),
                secret: "whsec".into(),
                headers: BTreeMap::from([("x-tenant".to_string(), "acme".to_string())]),
                retry_policy: Some(retry_policy),
                active: true,
                metadata: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn pending_delivery(store: &MemoryWebhookStore, subscription_id: &str) -> String {
        store
            .create_delivery(NewDelivery {
                subscription_id: subscription_id.into(),
                event_id: "evt-1".into(),
                payload: json!({"hello": "world"}),
                next_attempt_at: None,
            })
            .await
            .unwrap()
            .id
    }

    fn worker(store: &Arc<MemoryWebhookStore>) -> DeliveryWorker {
        DeliveryWorker::new(store.clone(), store.clone(), WorkerConfig::default())
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = sign_payload("secret", r#"{"test":"data"}"#);
        let b = sign_payload("secret", r#"{"test":"data"}"#);
        assert_eq!(a, b);
        assert_ne!(a, sign_payload("other", r#"{"test":"data"}"#));
    }

    #[tokio::test]
    async fn test_successful_delivery() {
        let server = MockServer::start().await;
        let expected_signature =
            format!("sha256={}", sign_payload("whsec", r#"{"hello":"world"}"#));
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("x-catalyst-event-id", "evt-1"))
            .and(header("x-catalyst-attempt", "1"))
            .and(header("x-tenant", "acme"))
            .and(header("x-catalyst-signature", expected_signature.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryWebhookStore::new());
        let sub_id = subscription_for(&store, &server, RetryPolicy::default()).await;
        let delivery_id = pending_delivery(&store, &sub_id).await;

        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                total: 1,
                succeeded: 1,
                retried: 0,
                dead_lettered: 0
            }
        );

        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Succeeded);
        assert_eq!(row.attempt_count, 1);
        assert!(row.next_attempt_at.is_none());
        assert!(row.error_message.is_none());
        assert_eq!(row.response.as_ref().unwrap().status, 200);
        assert_eq!(row.response.as_ref().unwrap().body, "ok");
    }

    #[tokio::test]
    async fn test_failure_schedules_retry_with_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryWebhookStore::new());
        let sub_id = subscription_for(&store, &server, RetryPolicy::default()).await;
        let delivery_id = pending_delivery(&store, &sub_id).await;

        let before = OffsetDateTime::now_utc();
        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.dead_lettered, 0);

        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.error_message.as_deref(), Some("HTTP 500"));
        // First failure uses backoff[0] = 30s.
        let next = row.next_attempt_at.unwrap();
        assert!(next >= before + time::Duration::seconds(29));
        assert!(next <= OffsetDateTime::now_utc() + time::Duration::seconds(31));
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryWebhookStore::new());
        let sub_id = subscription_for(
            &store,
            &server,
            RetryPolicy {
                max_attempts: 2,
                backoff_seconds: vec![30],
                dead_letter_uri: None,
            },
        )
        .await;
        let delivery_id = pending_delivery(&store, &sub_id).await;

        // First attempt has already happened and been rescheduled due.
        store
            .claim_delivery(&delivery_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        store
            .schedule_delivery_retry(
                &delivery_id,
                OffsetDateTime::now_utc() - time::Duration::seconds(1),
                "HTTP 500",
                None,
            )
            .await
            .unwrap();

        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                total: 1,
                succeeded: 0,
                retried: 0,
                dead_lettered: 1
            }
        );

        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::DeadLettered);
        assert_eq!(row.attempt_count, 2);
        assert_eq!(row.error_message.as_deref(), Some("HTTP 500"));
        assert!(row.next_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_subscription_dead_letters() {
        let store = Arc::new(MemoryWebhookStore::new());
        let delivery_id = pending_delivery(&store, "sub-gone").await;

        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(summary.dead_lettered, 1);

        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::DeadLettered);
        assert_eq!(
            row.error_message.as_deref(),
            Some("Webhook subscription not found.")
        );
        // No attempt was made.
        assert_eq!(row.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_network_failure_is_a_retry_decision() {
        let store = Arc::new(MemoryWebhookStore::new());
        // Unroutable target: the POST fails without an HTTP response.
        let sub_id = store
            .create_subscription(NewSubscription {
                org_id: None,
                event_types: vec!["e".into()],
                target_url: "http://127.0.0.1:1/hook".into(),
                secret: "whsec".into(),
                headers: BTreeMap::new(),
                retry_policy: Some(RetryPolicy::default()),
                active: true,
                metadata: None,
            })
            .await
            .unwrap()
            .id;
        let delivery_id = pending_delivery(&store, &sub_id).await;

        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(summary.retried, 1);

        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert!(row.error_message.unwrap().starts_with("request failed:"));
        assert!(row.response.is_none());
    }

    #[tokio::test]
    async fn test_future_deliveries_are_not_picked_up() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryWebhookStore::new());
        let sub_id = subscription_for(&store, &server, RetryPolicy::default()).await;
        store
            .create_delivery(NewDelivery {
                subscription_id: sub_id,
                event_id: "evt-1".into(),
                payload: json!({}),
                next_attempt_at: Some(OffsetDateTime::now_utc() + time::Duration::minutes(5)),
            })
            .await
            .unwrap();

        let summary = worker(&store).run_once().await.unwrap();
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn test_sweep_releases_stale_rows() {
        let store = Arc::new(MemoryWebhookStore::new());
        let server = MockServer::start().await;
        let sub_id = subscription_for(&store, &server, RetryPolicy::default()).await;
        let delivery_id = pending_delivery(&store, &sub_id).await;
        store
            .claim_delivery(
                &delivery_id,
                OffsetDateTime::now_utc() - time::Duration::minutes(30),
            )
            .await
            .unwrap();

        let released = worker(&store).sweep_stale().await.unwrap();
        assert_eq!(released, 1);
        let row = store.get_delivery(&delivery_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
    }
}
