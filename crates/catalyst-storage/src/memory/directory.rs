//! In-memory directory store.
//!
//! One struct implements the five directory traits so embedders and tests
//! can share a single `Arc<MemoryDirectory>` across the composer's ports.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use catalyst_core::{
    CatalystError, CatalystResult, Entitlement, Group, Membership, OrgProfile, SubjectKind,
    UserProfile,
};

use crate::directory::{EntitlementStore, GroupStore, MembershipStore, OrgStore, ProfileStore};

/// In-memory implementation of every directory trait.
#[derive(Default)]
pub struct MemoryDirectory {
    profiles: RwLock<HashMap<String, UserProfile>>,
    orgs: RwLock<HashMap<String, OrgProfile>>,
    groups: RwLock<HashMap<String, Group>>,
    memberships: RwLock<HashMap<String, Membership>>,
    entitlements: RwLock<HashMap<String, Entitlement>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryDirectory {
    async fn upsert_profile(&self, profile: UserProfile) -> CatalystResult<UserProfile> {
        let mut profiles = self.profiles.write().await;
        if profiles
            .values()
            .any(|p| p.authentik_id == profile.authentik_id && p.id != profile.id)
        {
            return Err(CatalystError::duplicate_id(format!(
                "authentik id '{}' is already claimed",
                profile.authentik_id
            )));
        }
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn get_profile(&self, id: &str) -> CatalystResult<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(id).cloned())
    }

    async fn get_profile_by_authentik_id(
        &self,
        authentik_id: &str,
    ) -> CatalystResult<Option<UserProfile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .find(|p| p.authentik_id == authentik_id)
            .cloned())
    }
}

#[async_trait]
impl OrgStore for MemoryDirectory {
    async fn upsert_org(&self, org: OrgProfile) -> CatalystResult<OrgProfile> {
        let mut orgs = self.orgs.write().await;
        if orgs
            .values()
            .any(|o| o.slug == org.slug && o.id != org.id)
        {
            return Err(CatalystError::duplicate_id(format!(
                "org slug '{}' is already claimed",
                org.slug
            )));
        }
        orgs.insert(org.id.clone(), org.clone());
        Ok(org)
    }

    async fn get_org(&self, id: &str) -> CatalystResult<Option<OrgProfile>> {
        Ok(self.orgs.read().await.get(id).cloned())
    }

    async fn get_org_by_slug(&self, slug: &str) -> CatalystResult<Option<OrgProfile>> {
        Ok(self
            .orgs
            .read()
            .await
            .values()
            .find(|o| o.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl GroupStore for MemoryDirectory {
    async fn upsert_group(&self, group: Group) -> CatalystResult<Group> {
        self.groups
            .write()
            .await
            .insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> CatalystResult<Option<Group>> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn get_groups(&self, ids: &[String]) -> CatalystResult<Vec<Group>> {
        let groups = self.groups.read().await;
        Ok(ids.iter().filter_map(|id| groups.get(id).cloned()).collect())
    }

    async fn list_groups_by_org(&self, org_id: &str) -> CatalystResult<Vec<Group>> {
        let mut groups: Vec<Group> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.org_id == org_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }
}

#[async_trait]
impl MembershipStore for MemoryDirectory {
    async fn upsert_membership(&self, membership: Membership) -> CatalystResult<Membership> {
        self.memberships
            .write()
            .await
            .insert(membership.id.clone(), membership.clone());
        Ok(membership)
    }

    async fn get_membership(&self, id: &str) -> CatalystResult<Option<Membership>> {
        Ok(self.memberships.read().await.get(id).cloned())
    }

    async fn find_membership_for_user_and_org(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> CatalystResult<Option<Membership>> {
        Ok(self
            .memberships
            .read()
            .await
            .values()
            .filter(|m| m.user_id == user_id && m.org_id == org_id)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list_memberships_for_user(&self, user_id: &str) -> CatalystResult<Vec<Membership>> {
        let mut memberships: Vec<Membership> = self
            .memberships
            .read()
            .await
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(memberships)
    }
}

#[async_trait]
impl EntitlementStore for MemoryDirectory {
    async fn grant_entitlement(&self, entitlement: Entitlement) -> CatalystResult<Entitlement> {
        let mut entitlements = self.entitlements.write().await;
        if entitlements.contains_key(&entitlement.id) {
            return Err(CatalystError::duplicate_id(format!(
                "entitlement '{}' already exists",
                entitlement.id
            )));
        }
        entitlements.insert(entitlement.id.clone(), entitlement.clone());
        Ok(entitlement)
    }

    async fn revoke_entitlement(&self, id: &str) -> CatalystResult<bool> {
        Ok(self.entitlements.write().await.remove(id).is_some())
    }

    async fn list_entitlements_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: &str,
    ) -> CatalystResult<Vec<Entitlement>> {
        let mut grants: Vec<Entitlement> = self
            .entitlements
            .read()
            .await
            .values()
            .filter(|e| e.subject_kind == kind && e.subject_id == subject_id)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_core::{LabelSet, OrgDisplayProfile, OrgStatus};
    use time::OffsetDateTime;

    fn profile(id: &str, authentik_id: &str) -> UserProfile {
        UserProfile {
            id: id.into(),
            authentik_id: authentik_id.into(),
            email: format!("{id}@example.com"),
            primary_org_id: None,
            display_name: None,
            avatar_url: None,
            labels: LabelSet::new(),
            metadata: None,
        }
    }

    fn org(id: &str, slug: &str) -> OrgProfile {
        OrgProfile {
            id: id.into(),
            slug: slug.into(),
            status: OrgStatus::Active,
            owner_user_id: "user-1".into(),
            profile: OrgDisplayProfile {
                name: slug.to_string(),
                extra: serde_json::Map::new(),
            },
            labels: LabelSet::new(),
            settings: serde_json::Value::Null,
        }
    }

    fn membership(id: &str, user: &str, org: &str, at: OffsetDateTime) -> Membership {
        Membership {
            id: id.into(),
            user_id: user.into(),
            org_id: org.into(),
            role: "member".into(),
            group_ids: vec![],
            labels_delta: LabelSet::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_profile_authentik_id_uniqueness() {
        let dir = MemoryDirectory::new();
        dir.upsert_profile(profile("u1", "ak-1")).await.unwrap();

        // Re-upserting the same profile is fine.
        dir.upsert_profile(profile("u1", "ak-1")).await.unwrap();

        // A different profile claiming the same subject is not.
        let err = dir.upsert_profile(profile("u2", "ak-1")).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_id");
    }

    #[tokio::test]
    async fn test_org_slug_uniqueness_and_lookup() {
        let dir = MemoryDirectory::new();
        dir.upsert_org(org("o1", "acme")).await.unwrap();
        let err = dir.upsert_org(org("o2", "acme")).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_id");

        let by_slug = dir.get_org_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(by_slug.id, "o1");
    }

    #[tokio::test]
    async fn test_earliest_membership_wins() {
        let dir = MemoryDirectory::new();
        let now = OffsetDateTime::now_utc();
        dir.upsert_membership(membership("m2", "u1", "o1", now))
            .await
            .unwrap();
        dir.upsert_membership(membership(
            "m1",
            "u1",
            "o1",
            now - time::Duration::days(1),
        ))
        .await
        .unwrap();

        let found = dir
            .find_membership_for_user_and_org("u1", "o1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "m1");
    }

    #[tokio::test]
    async fn test_memberships_listed_created_at_asc() {
        let dir = MemoryDirectory::new();
        let now = OffsetDateTime::now_utc();
        dir.upsert_membership(membership("m2", "u1", "o2", now))
            .await
            .unwrap();
        dir.upsert_membership(membership(
            "m1",
            "u1",
            "o1",
            now - time::Duration::days(1),
        ))
        .await
        .unwrap();

        let listed = dir.list_memberships_for_user("u1").await.unwrap();
        assert_eq!(
            listed.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
    }

    #[tokio::test]
    async fn test_get_groups_skips_missing() {
        let dir = MemoryDirectory::new();
        dir.upsert_group(Group {
            id: "g1".into(),
            org_id: "o1".into(),
            slug: "eng".into(),
            name: "Engineering".into(),
            description: None,
            parent_group_id: None,
            labels: LabelSet::new(),
        })
        .await
        .unwrap();

        let groups = dir
            .get_groups(&["g1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "g1");
    }

    #[tokio::test]
    async fn test_entitlements_ordered_by_created_at_then_id() {
        let dir = MemoryDirectory::new();
        let base = OffsetDateTime::now_utc();
        for (id, offset) in [("e2", 0), ("e1", 0), ("e3", 60)] {
            dir.grant_entitlement(Entitlement {
                id: id.into(),
                subject_kind: SubjectKind::User,
                subject_id: "u1".into(),
                entitlement: format!("feature:{id}"),
                created_at: base + time::Duration::seconds(offset),
                metadata: None,
            })
            .await
            .unwrap();
        }

        let listed = dir
            .list_entitlements_for_subject(SubjectKind::User, "u1")
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2", "e3"]
        );
    }
}
