//! The effective identity record.

use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;

/// The denormalized, join-complete view of who a caller is within an org
/// context. Built by the identity composer; consumed by the policy engine
/// and rendered into forward-auth response headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveIdentity {
    /// Subject id; `key:<id>` for synthetic key principals.
    pub user_id: String,
    /// Resolved org context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// IdP session, when the credential carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Resolved group ids; duplicate-free.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Merged labels (`user → org → membership → groups`, later wins).
    #[serde(default)]
    pub labels: LabelSet,
    /// Roles from the resolved membership.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Entitlement strings, first-seen order.
    #[serde(default)]
    pub entitlements: Vec<String>,
    /// Granted scopes; duplicate-free. Empty at the composer layer;
    /// keys and decisions inject scopes downstream.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl EffectiveIdentity {
    /// Creates an identity with only a subject set.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}
