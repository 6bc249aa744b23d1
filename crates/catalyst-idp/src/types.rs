//! Internal shapes produced by the IdP adapter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Tokens returned by an authorization-code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// The access token.
    pub access_token: String,
    /// The refresh token.
    pub refresh_token: String,
    /// Absolute expiry of the access token.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Token type as reported upstream (usually `Bearer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Granted scope string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Result of access-token introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIntrospection {
    /// Whether the token is currently active.
    pub active: bool,
    /// The token subject, when active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Token expiry, when reported.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Every other introspection field, verbatim.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl TokenIntrospection {
    /// An inactive introspection result with no claims.
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            active: false,
            subject: None,
            expires_at: None,
            claims: Map::new(),
        }
    }

    /// The IdP session id carried in the `sid` claim, when present.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.claims.get("sid").and_then(Value::as_str)
    }
}

/// A user record read from the IdP admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpUser {
    /// Upstream user id.
    pub id: String,
    /// Primary email.
    pub email: String,
    /// Display name, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw attribute blob for callers that need upstream extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

/// An active session as reported by the IdP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpSession {
    /// Upstream session id.
    pub id: String,
    /// Session start, when reported.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Verified factors (`factors` or `authenticated_methods` upstream).
    #[serde(default)]
    pub factors: Vec<String>,
    /// Connection metadata (`ip`, `userAgent`, `device`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A group node collected from the IdP groups endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpGroup {
    /// Group name, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Group slug, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}
