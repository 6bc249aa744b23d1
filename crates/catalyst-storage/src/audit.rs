//! Audit log storage trait.

use async_trait::async_trait;

use catalyst_core::{AuditEvent, AuditFilter, CatalystResult, NewAuditEvent};

/// Append-only audit log.
///
/// Events are never mutated or deleted. Ordering across writers is only
/// as strong as their timestamps; the default listing order is
/// `(occurred_at ASC, id ASC)`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends one event, assigning an id and defaulting `occurred_at`
    /// to now when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails. Callers on best-effort paths
    /// downgrade the error to a log line.
    async fn append_event(&self, event: NewAuditEvent) -> CatalystResult<AuditEvent>;

    /// Lists events matching the filter in default order. Used by tests
    /// and operators, not by the hot path.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_events(&self, filter: AuditFilter) -> CatalystResult<Vec<AuditEvent>>;
}
