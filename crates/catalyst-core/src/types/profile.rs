//! User and organization profiles.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::labels::LabelSet;

/// A locally cached user profile, upserted on first sign-in and on
/// explicit refresh. The IdP remains the source of truth for the subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Local profile id.
    pub id: String,
    /// Externally-assigned IdP subject; unique.
    pub authentik_id: String,
    /// Primary email.
    pub email: String,
    /// Default org used when no explicit org context is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_org_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// User-level labels; lowest precedence in the identity merge.
    #[serde(default)]
    pub labels: LabelSet,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Lifecycle status of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    /// Fully provisioned and usable.
    Active,
    /// Temporarily disabled by an operator.
    Suspended,
    /// Created by invitation, not yet accepted.
    Invited,
    /// Retired; retained for audit history.
    Archived,
}

/// Display profile of an organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgDisplayProfile {
    /// Human-readable org name.
    pub name: String,
    /// Additional presentation fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An organization profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgProfile {
    /// Org id.
    pub id: String,
    /// URL-safe unique slug.
    pub slug: String,
    /// Lifecycle status.
    pub status: OrgStatus,
    /// Owning user id.
    pub owner_user_id: String,
    /// Display profile.
    pub profile: OrgDisplayProfile,
    /// Org-level labels; merged over user labels.
    #[serde(default)]
    pub labels: LabelSet,
    /// Org settings blob.
    #[serde(default)]
    pub settings: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrgStatus::Suspended).unwrap(),
            "\"suspended\""
        );
        let status: OrgStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(status, OrgStatus::Archived);
    }

    #[test]
    fn test_user_profile_optional_fields_omitted() {
        let profile = UserProfile {
            id: "user-1".into(),
            authentik_id: "ak-1".into(),
            email: "a@example.com".into(),
            primary_org_id: None,
            display_name: None,
            avatar_url: None,
            labels: LabelSet::new(),
            metadata: None,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("displayName").is_none());
        assert!(json.get("primaryOrgId").is_none());
    }
}
