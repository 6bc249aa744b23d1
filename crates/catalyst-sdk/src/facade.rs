//! The `Catalyst` facade.

use std::sync::Arc;

use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use catalyst_core::{
    AuditEvent, AuditFilter, CatalystError, CatalystResult, EffectiveIdentity, Entitlement,
    Group, Key, KeyOwner, LabelSet, ListKeysOptions, Membership, NewAuditEvent, NewKey,
    NewSubscription, OrgProfile, RevokeKeyOptions, SubjectKind, SubscriptionUpdate, UserProfile,
    WebhookDelivery, WebhookEvent, WebhookSubscription, hash_key_secret,
};
use catalyst_identity::{IdentityComposer, IdentityQuery, IdentityResolver};
use catalyst_storage::{
    AuditStore, DeliveryStore, EntitlementStore, GroupStore, KeyStore, MembershipStore,
    MemoryAuditLog, MemoryDirectory, MemoryKeyStore, MemorySessionStore, MemoryWebhookStore,
    OrgStore, ProfileStore, SessionStore, SubscriptionStore,
};
use catalyst_webhooks::WebhookDispatcher;

use crate::secrets::generate_key_secret;

/// The stores the facade operates over.
#[derive(Clone)]
pub struct CatalystStores {
    /// API keys.
    pub keys: Arc<dyn KeyStore>,
    /// Sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// User profiles.
    pub profiles: Arc<dyn ProfileStore>,
    /// Organizations.
    pub orgs: Arc<dyn OrgStore>,
    /// Groups.
    pub groups: Arc<dyn GroupStore>,
    /// Memberships.
    pub memberships: Arc<dyn MembershipStore>,
    /// Entitlement grants.
    pub entitlements: Arc<dyn EntitlementStore>,
    /// The audit log.
    pub audit: Arc<dyn AuditStore>,
    /// Webhook subscriptions.
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// Webhook deliveries.
    pub deliveries: Arc<dyn DeliveryStore>,
}

impl CatalystStores {
    /// Wires every store to an in-memory implementation. Suited to tests
    /// and single-process embedding.
    #[must_use]
    pub fn in_memory() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let webhooks = Arc::new(MemoryWebhookStore::new());
        Self {
            keys: Arc::new(MemoryKeyStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            profiles: directory.clone(),
            orgs: directory.clone(),
            groups: directory.clone(),
            memberships: directory.clone(),
            entitlements: directory,
            audit: Arc::new(MemoryAuditLog::new()),
            subscriptions: webhooks.clone(),
            deliveries: webhooks,
        }
    }
}

/// Input to key issuance.
#[derive(Debug, Clone)]
pub struct IssueKeyRequest {
    /// Owning principal.
    pub owner: KeyOwner,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Issuing actor, recorded on the key and the audit event.
    pub created_by: Option<String>,
    /// Expiry; must be in the future when set.
    pub expires_at: Option<OffsetDateTime>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Labels merged into the caller's identity on key auth.
    pub labels: LabelSet,
    /// Free-form metadata.
    pub metadata: Option<Value>,
}

impl IssueKeyRequest {
    /// Creates a minimal issuance request.
    #[must_use]
    pub fn new(owner: KeyOwner) -> Self {
        Self {
            owner,
            name: None,
            description: None,
            created_by: None,
            expires_at: None,
            scopes: Vec::new(),
            labels: LabelSet::new(),
            metadata: None,
        }
    }
}

/// The result of key issuance. `secret` is returned exactly once and is
/// never persisted.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// The stored key record.
    pub key: Key,
    /// The plaintext secret to hand to the caller.
    pub secret: String,
}

/// Input to event publication.
#[derive(Debug, Clone)]
pub struct PublishEventRequest {
    /// Event type matched against subscriptions.
    pub event_type: String,
    /// Org scope, if any.
    pub org_id: Option<String>,
    /// Event payload.
    pub data: Value,
}

/// The embedding facade. Validates inputs, delegates to the stores, and
/// audits mutations.
pub struct Catalyst {
    stores: CatalystStores,
    resolver: Arc<dyn IdentityResolver>,
    dispatcher: WebhookDispatcher,
}

impl Catalyst {
    /// Creates a facade over the given stores.
    #[must_use]
    pub fn new(stores: CatalystStores) -> Self {
        let resolver = Arc::new(IdentityComposer::new(
            stores.profiles.clone(),
            stores.orgs.clone(),
            stores.groups.clone(),
            stores.memberships.clone(),
            stores.entitlements.clone(),
        ));
        let dispatcher =
            WebhookDispatcher::new(stores.subscriptions.clone(), stores.deliveries.clone());
        Self {
            stores,
            resolver,
            dispatcher,
        }
    }

    /// Creates a fully in-memory facade.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(CatalystStores::in_memory())
    }

    /// The underlying stores, for wiring the gateway and worker.
    #[must_use]
    pub fn stores(&self) -> &CatalystStores {
        &self.stores
    }

    /// The identity resolver backed by the directory stores.
    #[must_use]
    pub fn resolver(&self) -> Arc<dyn IdentityResolver> {
        self.resolver.clone()
    }

    async fn audit(&self, event: NewAuditEvent) {
        if let Err(error) = self.stores.audit.append_event(event).await {
            tracing::warn!(error = %error, "audit append failed");
        }
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    /// Generates a secret, hashes it, and issues the key. The secret is
    /// returned exactly once.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for bad input, `DuplicateId`/`DuplicateHash`
    /// on collision, or a `Storage` error.
    pub async fn issue_key(&self, request: IssueKeyRequest) -> CatalystResult<IssuedKey> {
        if request.owner.id.trim().is_empty() {
            return Err(CatalystError::validation("key owner id must not be empty"));
        }
        if let Some(name) = &request.name
            && name.trim().is_empty()
        {
            return Err(CatalystError::validation("key name must not be blank"));
        }
        if let Some(expires_at) = request.expires_at
            && expires_at <= OffsetDateTime::now_utc()
        {
            return Err(CatalystError::validation("key expiry must be in the future"));
        }

        let secret = generate_key_secret();
        let key = self
            .stores
            .keys
            .issue_key(NewKey {
                id: None,
                hash: hash_key_secret(&secret),
                owner: request.owner,
                name: request.name,
                description: request.description,
                created_by: request.created_by.clone(),
                expires_at: request.expires_at,
                scopes: request.scopes,
                labels: request.labels,
                metadata: request.metadata,
            })
            .await?;

        self.audit(
            NewAuditEvent::new("keys", "key_issued")
                .with_resource(key.id.clone())
                .with_metadata(json!({
                    "owner": key.owner,
                    "createdBy": request.created_by,
                    "scopes": key.scopes,
                })),
        )
        .await;

        Ok(IssuedKey { key, secret })
    }

    /// Resolves a presented secret to its key record, if any. Status is
    /// derived at read time; the caller decides what to do with inactive
    /// keys.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the lookup fails.
    pub async fn verify_key(&self, secret: &str) -> CatalystResult<Option<Key>> {
        self.stores.keys.get_key_by_hash(&hash_key_secret(secret)).await
    }

    /// Revokes a key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    pub async fn revoke_key(&self, id: &str, options: RevokeKeyOptions) -> CatalystResult<Key> {
        let key = self.stores.keys.revoke_key(id, options.clone()).await?;
        self.audit(
            NewAuditEvent::new("keys", "key_revoked")
                .with_resource(key.id.clone())
                .with_metadata(json!({
                    "revokedBy": options.revoked_by,
                    "reason": options.reason,
                })),
        )
        .await;
        Ok(key)
    }

    /// Lists an owner's keys.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the listing fails.
    pub async fn list_keys(
        &self,
        owner: &KeyOwner,
        options: ListKeysOptions,
    ) -> CatalystResult<Vec<Key>> {
        self.stores.keys.list_keys_by_owner(owner, options).await
    }

    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------

    /// Upserts a user profile.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for bad input or `DuplicateId` when the IdP
    /// subject is claimed by another profile.
    pub async fn upsert_profile(&self, profile: UserProfile) -> CatalystResult<UserProfile> {
        if profile.id.trim().is_empty() || profile.authentik_id.trim().is_empty() {
            return Err(CatalystError::validation(
                "profile id and authentik id must not be empty",
            ));
        }
        if !profile.email.contains('@') {
            return Err(CatalystError::validation_with_details(
                "profile email is not an address",
                json!({"email": profile.email}),
            ));
        }
        let profile = self.stores.profiles.upsert_profile(profile).await?;
        self.audit(
            NewAuditEvent::new("profiles", "profile_upserted")
                .with_resource(profile.id.clone()),
        )
        .await;
        Ok(profile)
    }

    /// Upserts an org.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty slug or `DuplicateId` when the
    /// slug is claimed.
    pub async fn upsert_org(&self, org: OrgProfile) -> CatalystResult<OrgProfile> {
        if org.slug.trim().is_empty() {
            return Err(CatalystError::validation("org slug must not be empty"));
        }
        let org = self.stores.orgs.upsert_org(org).await?;
        self.audit(NewAuditEvent::new("orgs", "org_upserted").with_resource(org.id.clone()))
            .await;
        Ok(org)
    }

    /// Upserts a group.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the write fails.
    pub async fn upsert_group(&self, group: Group) -> CatalystResult<Group> {
        let group = self.stores.groups.upsert_group(group).await?;
        self.audit(NewAuditEvent::new("groups", "group_upserted").with_resource(group.id.clone()))
            .await;
        Ok(group)
    }

    /// Upserts a membership.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the write fails.
    pub async fn upsert_membership(&self, membership: Membership) -> CatalystResult<Membership> {
        let membership = self.stores.memberships.upsert_membership(membership).await?;
        self.audit(
            NewAuditEvent::new("memberships", "membership_upserted")
                .with_resource(membership.id.clone()),
        )
        .await;
        Ok(membership)
    }

    /// Grants an entitlement, minting the id and timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty entitlement string.
    pub async fn grant_entitlement(
        &self,
        subject_kind: SubjectKind,
        subject_id: impl Into<String>,
        entitlement: impl Into<String>,
    ) -> CatalystResult<Entitlement> {
        let entitlement = entitlement.into();
        if entitlement.trim().is_empty() {
            return Err(CatalystError::validation("entitlement must not be empty"));
        }
        let grant = self
            .stores
            .entitlements
            .grant_entitlement(Entitlement {
                id: Uuid::new_v4().to_string(),
                subject_kind,
                subject_id: subject_id.into(),
                entitlement,
                created_at: OffsetDateTime::now_utc(),
                metadata: None,
            })
            .await?;
        self.audit(
            NewAuditEvent::new("entitlements", "entitlement_granted")
                .with_resource(grant.id.clone()),
        )
        .await;
        Ok(grant)
    }

    /// Composes the effective identity for a query.
    ///
    /// # Errors
    ///
    /// See [`IdentityResolver::effective_identity`].
    pub async fn effective_identity(
        &self,
        query: IdentityQuery,
    ) -> CatalystResult<EffectiveIdentity> {
        self.resolver.effective_identity(query).await
    }

    // -------------------------------------------------------------------------
    // Webhooks
    // -------------------------------------------------------------------------

    fn validate_event_types(event_types: &[String]) -> CatalystResult<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let cleaned: Vec<String> = event_types
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if cleaned.is_empty() {
            return Err(CatalystError::validation(
                "subscription must name at least one event type",
            ));
        }
        Ok(cleaned)
    }

    fn validate_target_url(target_url: &str) -> CatalystResult<()> {
        let url = Url::parse(target_url).map_err(|e| {
            CatalystError::validation_with_details(
                "subscription target URL is invalid",
                json!({"targetUrl": target_url, "error": e.to_string()}),
            )
        })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(CatalystError::validation(
                "subscription target URL must be http(s)",
            ));
        }
        Ok(())
    }

    /// Creates a webhook subscription.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty event types, a malformed target
    /// URL, an empty secret, or a zero-attempt retry policy.
    pub async fn create_subscription(
        &self,
        mut input: NewSubscription,
    ) -> CatalystResult<WebhookSubscription> {
        input.event_types = Self::validate_event_types(&input.event_types)?;
        Self::validate_target_url(&input.target_url)?;
        if input.secret.trim().is_empty() {
            return Err(CatalystError::validation(
                "subscription secret must not be empty",
            ));
        }
        if let Some(policy) = &input.retry_policy
            && policy.max_attempts == 0
        {
            return Err(CatalystError::validation(
                "retry policy must allow at least one attempt",
            ));
        }

        let subscription = self.stores.subscriptions.create_subscription(input).await?;
        self.audit(
            NewAuditEvent::new("webhooks", "subscription_created")
                .with_resource(subscription.id.clone())
                .with_metadata(json!({
                    "eventTypes": subscription.event_types,
                    "targetUrl": subscription.target_url,
                })),
        )
        .await;
        Ok(subscription)
    }

    /// Applies a partial subscription update.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for invalid replacement fields or `NotFound`
    /// for a missing subscription.
    pub async fn update_subscription(
        &self,
        id: &str,
        mut update: SubscriptionUpdate,
    ) -> CatalystResult<WebhookSubscription> {
        if let Some(event_types) = &update.event_types {
            update.event_types = Some(Self::validate_event_types(event_types)?);
        }
        if let Some(target_url) = &update.target_url {
            Self::validate_target_url(target_url)?;
        }

        let subscription = self
            .stores
            .subscriptions
            .update_subscription(id, update)
            .await?;
        self.audit(
            NewAuditEvent::new("webhooks", "subscription_updated")
                .with_resource(subscription.id.clone()),
        )
        .await;
        Ok(subscription)
    }

    /// Deletes a subscription. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the delete fails.
    pub async fn delete_subscription(&self, id: &str) -> CatalystResult<bool> {
        let deleted = self.stores.subscriptions.delete_subscription(id).await?;
        if deleted {
            self.audit(
                NewAuditEvent::new("webhooks", "subscription_deleted").with_resource(id),
            )
            .await;
        }
        Ok(deleted)
    }

    /// Publishes a domain event: mints the event record and fans out one
    /// pending delivery per matching subscription.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty event type or a `Storage` error
    /// from fan-out.
    pub async fn publish_event(
        &self,
        request: PublishEventRequest,
    ) -> CatalystResult<(WebhookEvent, Vec<WebhookDelivery>)> {
        if request.event_type.trim().is_empty() {
            return Err(CatalystError::validation("event type must not be empty"));
        }
        let event = WebhookEvent {
            id: Uuid::new_v4().to_string(),
            event_type: request.event_type,
            org_id: request.org_id,
            occurred_at: OffsetDateTime::now_utc(),
            data: request.data,
        };
        let deliveries = self.dispatcher.dispatch(&event).await?;
        self.audit(
            NewAuditEvent::new("webhooks", "event_published")
                .with_resource(event.id.clone())
                .with_metadata(json!({
                    "type": event.event_type,
                    "deliveries": deliveries.len(),
                })),
        )
        .await;
        Ok((event, deliveries))
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    /// Appends an audit event on behalf of an embedding caller.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty category or action.
    pub async fn record_audit(&self, event: NewAuditEvent) -> CatalystResult<AuditEvent> {
        if event.category.trim().is_empty() || event.action.trim().is_empty() {
            return Err(CatalystError::validation(
                "audit events need a category and an action",
            ));
        }
        self.stores.audit.append_event(event).await
    }

    /// Lists audit events.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the listing fails.
    pub async fn list_audit(&self, filter: AuditFilter) -> CatalystResult<Vec<AuditEvent>> {
        self.stores.audit.list_events(filter).await
    }
}
