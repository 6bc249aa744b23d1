//! Groups and memberships.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::labels::LabelSet;

/// A group within an organization. `parent_group_id` forms a forest per
/// org; cycles are tolerated at read time by the identity composer, not
/// rejected at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group id.
    pub id: String,
    /// Owning org.
    pub org_id: String,
    /// Slug; unique within the org.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parent group, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_group_id: Option<String>,
    /// Group labels; highest precedence in the identity merge.
    #[serde(default)]
    pub labels: LabelSet,
}

/// The link record between a user and an org.
///
/// A user may hold memberships in many orgs. At most one membership per
/// `(user, org)` is the semantic intent; lookups resolve ties by earliest
/// `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Membership id.
    pub id: String,
    /// Member user id.
    pub user_id: String,
    /// Org id.
    pub org_id: String,
    /// Role held within the org.
    pub role: String,
    /// Groups the user belongs to in this org.
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Membership-scoped label overrides; merged over org labels.
    #[serde(default)]
    pub labels_delta: LabelSet,
    /// Creation timestamp; the tiebreaker for `(user, org)` lookups.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
