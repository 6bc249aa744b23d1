//! Entitlement grants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// The kind of subject an entitlement is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// Granted directly to a user.
    User,
    /// Granted to every member of an org.
    Org,
    /// Granted through a specific membership.
    Membership,
}

/// A single entitlement grant. Listing order is `(created_at ASC, id ASC)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// Grant id.
    pub id: String,
    /// Subject kind.
    pub subject_kind: SubjectKind,
    /// Subject id (user, org, or membership id per `subject_kind`).
    pub subject_id: String,
    /// The entitlement string (e.g. `feature:exports`).
    pub entitlement: String,
    /// Grant timestamp; part of the listing sort key.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}
