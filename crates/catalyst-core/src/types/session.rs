//! Session activity records.
//!
//! The IdP is the authority on session existence; the local store is an
//! activity cache the gateway touches on every allowed request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A locally tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id as reported by the IdP.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Creation timestamp (seeded from the IdP when available).
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last observed activity.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    /// Authentication factors verified for this session.
    #[serde(default)]
    pub factors_verified: Vec<String>,
    /// Deep-merged activity metadata (forwarding context, device info).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Input to session creation.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Session id (IdP-assigned).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Creation timestamp; defaults to now when `None`.
    pub created_at: Option<OffsetDateTime>,
    /// Verified factors, typically seeded from the IdP.
    pub factors_verified: Vec<String>,
    /// Initial metadata.
    pub metadata: Option<Value>,
}

/// Fields applied by a session touch.
#[derive(Debug, Clone)]
pub struct SessionTouch {
    /// New `last_seen_at` value.
    pub last_seen_at: OffsetDateTime,
    /// Replacement metadata (callers deep-merge before touching).
    pub metadata: Option<Value>,
}
