//! Directory storage traits: profiles, orgs, groups, memberships, and
//! entitlements. These are the joins behind effective-identity
//! composition.

use async_trait::async_trait;

use catalyst_core::{
    CatalystResult, Entitlement, Group, Membership, OrgProfile, SubjectKind, UserProfile,
};

/// Storage trait for user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Inserts or replaces a profile, keyed by `id`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the `authentik_id` is already claimed by a
    /// different profile.
    async fn upsert_profile(&self, profile: UserProfile) -> CatalystResult<UserProfile>;

    /// Looks a profile up by local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_profile(&self, id: &str) -> CatalystResult<Option<UserProfile>>;

    /// Looks a profile up by the externally-assigned IdP subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_profile_by_authentik_id(
        &self,
        authentik_id: &str,
    ) -> CatalystResult<Option<UserProfile>>;
}

/// Storage trait for organization profiles.
#[async_trait]
pub trait OrgStore: Send + Sync {
    /// Inserts or replaces an org, keyed by `id`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the slug is already claimed by a
    /// different org.
    async fn upsert_org(&self, org: OrgProfile) -> CatalystResult<OrgProfile>;

    /// Looks an org up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_org(&self, id: &str) -> CatalystResult<Option<OrgProfile>>;

    /// Looks an org up by slug.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_org_by_slug(&self, slug: &str) -> CatalystResult<Option<OrgProfile>>;
}

/// Storage trait for groups.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Inserts or replaces a group, keyed by `id`.
    ///
    /// Parent cycles are not rejected here; the identity composer prunes
    /// them during traversal.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert_group(&self, group: Group) -> CatalystResult<Group>;

    /// Looks a group up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_group(&self, id: &str) -> CatalystResult<Option<Group>>;

    /// Loads the groups for the given ids. Missing ids are skipped, not
    /// errors; the result preserves the order of `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_groups(&self, ids: &[String]) -> CatalystResult<Vec<Group>>;

    /// Lists an org's groups.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_groups_by_org(&self, org_id: &str) -> CatalystResult<Vec<Group>>;
}

/// Storage trait for memberships.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Inserts or replaces a membership, keyed by `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert_membership(&self, membership: Membership) -> CatalystResult<Membership>;

    /// Looks a membership up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_membership(&self, id: &str) -> CatalystResult<Option<Membership>>;

    /// Finds the membership for `(user, org)`. When several exist, the
    /// earliest by `created_at` wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_membership_for_user_and_org(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> CatalystResult<Option<Membership>>;

    /// Lists a user's memberships in `created_at ASC` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_memberships_for_user(&self, user_id: &str) -> CatalystResult<Vec<Membership>>;
}

/// Storage trait for entitlement grants.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Records a grant.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` on id collision.
    async fn grant_entitlement(&self, entitlement: Entitlement) -> CatalystResult<Entitlement>;

    /// Removes a grant. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_entitlement(&self, id: &str) -> CatalystResult<bool>;

    /// Lists grants for one subject in `(created_at ASC, id ASC)` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_entitlements_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: &str,
    ) -> CatalystResult<Vec<Entitlement>>;
}
