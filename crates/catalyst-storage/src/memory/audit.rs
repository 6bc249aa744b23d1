//! In-memory audit log.

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use catalyst_core::{AuditEvent, AuditFilter, CatalystResult, NewAuditEvent};

use crate::audit::AuditStore;

/// In-memory append-only [`AuditStore`].
#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditLog {
    async fn append_event(&self, event: NewAuditEvent) -> CatalystResult<AuditEvent> {
        let record = AuditEvent {
            id: event.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            occurred_at: event.occurred_at.unwrap_or_else(OffsetDateTime::now_utc),
            category: event.category,
            action: event.action,
            actor: event.actor,
            subject: event.subject,
            resource: event.resource,
            metadata: event.metadata,
            correlation_id: event.correlation_id,
        };
        self.events.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_events(&self, filter: AuditFilter) -> CatalystResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let mut matched: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|c| e.category == c)
                    && filter.actor.as_deref().is_none_or(|a| {
                        e.actor.as_deref() == Some(a)
                    })
                    && filter.since.is_none_or(|s| e.occurred_at >= s)
                    && filter.until.is_none_or(|u| e.occurred_at < u)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_id_and_timestamp() {
        let log = MemoryAuditLog::new();
        let event = log
            .append_event(NewAuditEvent::new("keys", "key_issued"))
            .await
            .unwrap();
        assert!(!event.id.is_empty());
        assert_eq!(event.category, "keys");
    }

    #[tokio::test]
    async fn test_list_filters_by_category_and_time() {
        let log = MemoryAuditLog::new();
        let base = OffsetDateTime::now_utc();

        for (category, offset) in [("keys", -60), ("forward_auth", 0), ("keys", 60)] {
            let mut event = NewAuditEvent::new(category, "x");
            event.occurred_at = Some(base + time::Duration::seconds(offset));
            log.append_event(event).await.unwrap();
        }

        let keys_only = log
            .list_events(AuditFilter {
                category: Some("keys".into()),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(keys_only.len(), 2);

        let recent = log
            .list_events(AuditFilter {
                since: Some(base),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_limited() {
        let log = MemoryAuditLog::new();
        let base = OffsetDateTime::now_utc();
        for (id, offset) in [("b", 0), ("a", 0), ("c", 30)] {
            let mut event = NewAuditEvent::new("t", "x");
            event.id = Some(id.into());
            event.occurred_at = Some(base + time::Duration::seconds(offset));
            log.append_event(event).await.unwrap();
        }

        let all = log.list_events(AuditFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        let limited = log
            .list_events(AuditFilter {
                limit: Some(2),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}
