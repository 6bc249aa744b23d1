//! Audit events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// An append-only audit event. Default listing order is
/// `(occurred_at ASC, id ASC)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Event id.
    pub id: String,
    /// When the event occurred.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    /// Event category (e.g. `forward_auth`, `keys`, `webhooks`).
    pub category: String,
    /// Action within the category (e.g. `decision_cached`, `key_revoked`).
    pub action: String,
    /// Acting principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Affected principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Affected resource identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Structured event context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Correlates events emitted by one request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Input to audit append; the store assigns `id` and defaults
/// `occurred_at` to now.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEvent {
    /// Explicit event id, or `None` to mint one.
    pub id: Option<String>,
    /// Explicit timestamp, or `None` for now.
    pub occurred_at: Option<OffsetDateTime>,
    /// Event category.
    pub category: String,
    /// Action within the category.
    pub action: String,
    /// Acting principal.
    pub actor: Option<String>,
    /// Affected principal.
    pub subject: Option<String>,
    /// Affected resource identifier.
    pub resource: Option<String>,
    /// Structured event context.
    pub metadata: Option<Value>,
    /// Request correlation id.
    pub correlation_id: Option<String>,
}

impl NewAuditEvent {
    /// Creates an event input for `category`/`action`.
    #[must_use]
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    /// Sets the acting principal.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the affected resource.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filters for audit listing. All filters are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Restrict to one category.
    pub category: Option<String>,
    /// Restrict to one actor.
    pub actor: Option<String>,
    /// Events at or after this instant.
    pub since: Option<OffsetDateTime>,
    /// Events strictly before this instant.
    pub until: Option<OffsetDateTime>,
    /// Maximum rows returned.
    pub limit: Option<usize>,
}
