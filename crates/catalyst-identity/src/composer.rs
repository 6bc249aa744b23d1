//! The effective-identity composer.
//!
//! Resolution order:
//!
//! 1. Load the user (by local id, falling back to the IdP subject).
//! 2. Resolve the membership (explicit id with ownership checks, the
//!    earliest membership for `(user, org)`, or the user's first listed
//!    membership).
//! 3. Resolve the effective org (`explicit ?? membership ?? primary`).
//! 4. Load the membership's groups; walk parent chains for label merging
//!    with visited-set cycle pruning.
//! 5. Merge labels `user → org → membership → groups` (later wins).
//! 6. Union entitlements over user, org, and membership subjects.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use catalyst_core::{
    CatalystError, CatalystResult, EffectiveIdentity, Entitlement, Group, LabelSet, Membership,
    SubjectKind, merge_labels,
};
use catalyst_storage::{
    EntitlementStore, GroupStore, MembershipStore, OrgStore, ProfileStore,
};

/// Query input for identity composition.
#[derive(Debug, Clone)]
pub struct IdentityQuery {
    /// User to resolve: a local profile id or the IdP subject.
    pub user_id: String,
    /// Explicit org context. Must exist when set.
    pub org_id: Option<String>,
    /// Explicit membership; must belong to the user (and org, when set).
    pub membership_id: Option<String>,
    /// Whether to resolve groups; defaults to `true`.
    pub include_groups: bool,
}

impl IdentityQuery {
    /// Creates a query for a user with no org context.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: None,
            membership_id: None,
            include_groups: true,
        }
    }

    /// Sets the org context.
    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

/// The identity-resolution port consumed by the gateway and SDK.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Composes the effective identity for a query.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for missing users or an explicitly requested
    /// org that does not exist, `Validation` for membership ownership
    /// violations, or a `Storage` error when a read fails.
    async fn effective_identity(&self, query: IdentityQuery) -> CatalystResult<EffectiveIdentity>;
}

/// Store-backed [`IdentityResolver`].
pub struct IdentityComposer {
    profiles: Arc<dyn ProfileStore>,
    orgs: Arc<dyn OrgStore>,
    groups: Arc<dyn GroupStore>,
    memberships: Arc<dyn MembershipStore>,
    entitlements: Arc<dyn EntitlementStore>,
}

impl IdentityComposer {
    /// Creates a composer over the directory stores.
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        orgs: Arc<dyn OrgStore>,
        groups: Arc<dyn GroupStore>,
        memberships: Arc<dyn MembershipStore>,
        entitlements: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self {
            profiles,
            orgs,
            groups,
            memberships,
            entitlements,
        }
    }

    async fn resolve_membership(
        &self,
        user_id: &str,
        query: &IdentityQuery,
    ) -> CatalystResult<Option<Membership>> {
        if let Some(membership_id) = &query.membership_id {
            let membership = self
                .memberships
                .get_membership(membership_id)
                .await?
                .ok_or_else(|| {
                    CatalystError::not_found(format!("membership {membership_id}"))
                })?;
            if membership.user_id != user_id {
                return Err(CatalystError::validation(format!(
                    "membership {membership_id} does not belong to user {user_id}"
                )));
            }
            if let Some(org_id) = &query.org_id
                && membership.org_id != *org_id
            {
                return Err(CatalystError::validation(format!(
                    "membership {membership_id} does not belong to org {org_id}"
                )));
            }
            return Ok(Some(membership));
        }

        if let Some(org_id) = &query.org_id {
            return self
                .memberships
                .find_membership_for_user_and_org(user_id, org_id)
                .await;
        }

        Ok(self
            .memberships
            .list_memberships_for_user(user_id)
            .await?
            .into_iter()
            .next())
    }

    /// Collects chain labels for one group: ancestors first, the group
    /// itself last, so nearer groups win the merge. A parent id seen
    /// twice ends the walk (cycle pruning), it does not fail.
    async fn chain_labels(&self, group: &Group) -> CatalystResult<LabelSet> {
        let mut chain = vec![group.labels.clone()];
        let mut visited: HashSet<String> = HashSet::from([group.id.clone()]);
        let mut parent_id = group.parent_group_id.clone();

        while let Some(id) = parent_id {
            if !visited.insert(id.clone()) {
                tracing::warn!(group_id = %group.id, cycling_id = %id, "group parent cycle pruned");
                break;
            }
            let Some(parent) = self.groups.get_group(&id).await? else {
                break;
            };
            chain.push(parent.labels.clone());
            parent_id = parent.parent_group_id;
        }

        chain.reverse();
        Ok(merge_labels(chain.iter()))
    }

    async fn union_entitlements(
        &self,
        user_id: &str,
        org_id: Option<&str>,
        membership_id: Option<&str>,
    ) -> CatalystResult<Vec<String>> {
        let mut grants: Vec<Entitlement> = self
            .entitlements
            .list_entitlements_for_subject(SubjectKind::User, user_id)
            .await?;
        if let Some(org_id) = org_id {
            grants.extend(
                self.entitlements
                    .list_entitlements_for_subject(SubjectKind::Org, org_id)
                    .await?,
            );
        }
        if let Some(membership_id) = membership_id {
            grants.extend(
                self.entitlements
                    .list_entitlements_for_subject(SubjectKind::Membership, membership_id)
                    .await?,
            );
        }

        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut seen = HashSet::new();
        Ok(grants
            .into_iter()
            .filter(|g| seen.insert(g.entitlement.clone()))
            .map(|g| g.entitlement)
            .collect())
    }
}

#[async_trait]
impl IdentityResolver for IdentityComposer {
    async fn effective_identity(&self, query: IdentityQuery) -> CatalystResult<EffectiveIdentity> {
        let user = match self.profiles.get_profile(&query.user_id).await? {
            Some(user) => user,
            None => self
                .profiles
                .get_profile_by_authentik_id(&query.user_id)
                .await?
                .ok_or_else(|| {
                    CatalystError::not_found(format!("user {}", query.user_id))
                })?,
        };

        let membership = self.resolve_membership(&user.id, &query).await?;

        // Effective org: explicit request > membership > primary org.
        let org_id = query
            .org_id
            .clone()
            .or_else(|| membership.as_ref().map(|m| m.org_id.clone()))
            .or_else(|| user.primary_org_id.clone());

        let org = match &org_id {
            Some(id) => {
                let org = self.orgs.get_org(id).await?;
                if org.is_none() && query.org_id.is_some() {
                    return Err(CatalystError::not_found(format!("org {id}")));
                }
                org
            }
            None => None,
        };

        let mut group_ids: Vec<String> = Vec::new();
        let mut group_label_layers: Vec<LabelSet> = Vec::new();
        if query.include_groups
            && let Some(membership) = &membership
        {
            let mut groups = self.groups.get_groups(&membership.group_ids).await?;

            let mut seen = HashSet::new();
            for id in &membership.group_ids {
                if groups.iter().any(|g| &g.id == id) && seen.insert(id.clone()) {
                    group_ids.push(id.clone());
                }
            }

            // Label layers go in group-id order regardless of the order
            // the membership lists them.
            groups.sort_by(|a, b| a.id.cmp(&b.id));
            groups.dedup_by(|a, b| a.id == b.id);
            for group in &groups {
                group_label_layers.push(self.chain_labels(group).await?);
            }
        }

        let mut label_layers: Vec<&LabelSet> = vec![&user.labels];
        if let Some(org) = &org {
            label_layers.push(&org.labels);
        }
        if let Some(membership) = &membership {
            label_layers.push(&membership.labels_delta);
        }
        label_layers.extend(group_label_layers.iter());
        let labels = merge_labels(label_layers);

        let entitlements = self
            .union_entitlements(
                &user.id,
                org_id.as_deref(),
                membership.as_ref().map(|m| m.id.as_str()),
            )
            .await?;

        Ok(EffectiveIdentity {
            user_id: user.id,
            org_id,
            session_id: None,
            groups: group_ids,
            labels,
            roles: membership.as_ref().map(|m| vec![m.role.clone()]).unwrap_or_default(),
            entitlements,
            scopes: Vec::new(),
        })
    }
}
