//! The forward-auth decision pipeline.
//!
//! One operation: [`ForwardAuthService::handle`]. The pipeline is:
//!
//! 1. Normalize headers, short-circuit on a cached decision token
//! 2. Extract the credential (`x-api-key`, then `authorization`)
//! 3. Resolve the identity (access-token or API-key path)
//! 4. Touch the session (best-effort)
//! 5. Derive action/resource/environment and evaluate policy
//! 6. Render the allow headers, write the decision cache, emit audit
//!
//! Failure semantics: transient upstream failures map to `502`,
//! deterministic rejections to `401`/`403`, misconfiguration to `500`.
//! Side-effect writes (key usage, session touch, cache write, audit
//! append) never turn a would-be allow into an error; their failures are
//! logged and dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use catalyst_cache::{CacheSetOptions, DecisionCache, DecisionCacheEntry};
use catalyst_core::{
    CatalystError, CatalystResult, EffectiveIdentity, Key, KeyOwnerKind, NewAuditEvent,
    NewSession, SessionTouch, deep_merge, dedupe_scopes, hash_key_secret, merge_labels,
};
use catalyst_identity::{IdentityQuery, IdentityResolver};
use catalyst_idp::IdentityProvider;
use catalyst_policy::{Decision, PolicyEngine, PolicyInput};
use catalyst_storage::{AuditStore, KeyStore, SessionStore};

use crate::config::GatewayConfig;
use crate::headers;
use crate::request::{
    Credential, ForwardAuthRequest, ForwardAuthResponse, client_ip, extract_credential,
};

/// The forward-auth service.
///
/// The IdP, resolver, and policy engine are required; cache, key store,
/// session store, and audit sink are optional and their absence degrades
/// the corresponding step (no cache short-circuit, `500` on API keys,
/// no session touch, no audit).
pub struct ForwardAuthService {
    config: GatewayConfig,
    idp: Arc<dyn IdentityProvider>,
    resolver: Arc<dyn IdentityResolver>,
    policy: Arc<dyn PolicyEngine>,
    cache: Option<Arc<dyn DecisionCache>>,
    keys: Option<Arc<dyn KeyStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    audit: Option<Arc<dyn AuditStore>>,
}

impl ForwardAuthService {
    /// Creates a service with only the required ports wired.
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        idp: Arc<dyn IdentityProvider>,
        resolver: Arc<dyn IdentityResolver>,
        policy: Arc<dyn PolicyEngine>,
    ) -> Self {
        Self {
            config,
            idp,
            resolver,
            policy,
            cache: None,
            keys: None,
            sessions: None,
            audit: None,
        }
    }

    /// Wires the decision cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Wires the key store, enabling the API-key path.
    #[must_use]
    pub fn with_key_store(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Wires the session store, enabling session touches.
    #[must_use]
    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Wires the audit sink.
    #[must_use]
    pub fn with_audit_store(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The decision cache, when configured. Used by the health endpoint.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn DecisionCache>> {
        self.cache.as_ref()
    }

    /// Answers one forward-auth request.
    pub async fn handle(&self, request: &ForwardAuthRequest) -> ForwardAuthResponse {
        let headers = request.normalized_headers();

        // Step 1: a cached decision preempts all downstream work.
        if let Some(token) = headers.get(headers::DECISION_JWT)
            && let Some(cache) = &self.cache
        {
            match cache.get(&self.config.cache_key(token)).await {
                Ok(Some(entry)) => {
                    let mut cached = entry.headers;
                    cached.insert(headers::DECISION_JWT.to_string(), token.clone());
                    return ForwardAuthResponse::allow(cached);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(error = %error, "decision cache lookup failed; treating as miss");
                }
            }
        }

        // Step 2: credential extraction.
        let Some(credential) = extract_credential(&headers) else {
            return ForwardAuthResponse::error(401, "missing_credentials");
        };

        let org_id = request
            .org_id
            .clone()
            .or_else(|| headers.get(&self.config.org_header).cloned());

        // Step 3: identity resolution.
        let identity = match self.resolve_identity(credential, org_id).await {
            Ok(identity) => identity,
            Err(response) => return *response,
        };

        // Step 4: best-effort session touch.
        self.touch_session(&identity, &headers).await;

        // Step 5: policy evaluation.
        let action = request.action.clone().unwrap_or_else(|| {
            format!("{} {}", request.method.to_uppercase(), request.path)
        });
        let resource = request.resource.clone();
        let environment = self.build_environment(&headers, request);

        let input = PolicyInput {
            identity: identity.clone(),
            action,
            resource,
            environment,
        };
        let decision = match self.policy.evaluate(&input).await {
            Ok(decision) => decision,
            Err(error) => {
                tracing::error!(error = %error, "policy evaluation failed");
                return ForwardAuthResponse::error(502, "policy_error")
                    .with_header(headers::FORWARD_AUTH_ERROR_MESSAGE, error.to_string());
            }
        };

        if !decision.allow {
            let mut response = ForwardAuthResponse::error(
                403,
                decision.reason.as_deref().unwrap_or("policy_denied"),
            );
            if let Some(obligations) = &decision.obligations {
                response = response
                    .with_header(headers::POLICY_OBLIGATIONS, obligations.to_string());
            }
            return response;
        }

        // Step 6: allow response, decision cache write, audit.
        let response = self.render_allow(&identity, &decision);
        if let Some(token) = &decision.decision_jwt {
            self.store_decision(token, &response).await;
            self.audit_decision(token, &identity).await;
        }
        response
    }

    async fn resolve_identity(
        &self,
        credential: Credential,
        org_id: Option<String>,
    ) -> Result<EffectiveIdentity, Box<ForwardAuthResponse>> {
        match credential {
            Credential::AccessToken(token) => self.resolve_access_token(&token, org_id).await,
            Credential::ApiKey(secret) => self.resolve_api_key(&secret, org_id).await,
        }
    }

    async fn resolve_access_token(
        &self,
        token: &str,
        org_id: Option<String>,
    ) -> Result<EffectiveIdentity, Box<ForwardAuthResponse>> {
        let introspection = match self.idp.validate_access_token(token).await {
            Ok(introspection) => introspection,
            Err(error) => {
                tracing::error!(error = %error, "access-token validation failed");
                return Err(Box::new(
                    ForwardAuthResponse::error(502, "token_validation_error")
                        .with_header(headers::FORWARD_AUTH_ERROR_MESSAGE, error.to_string()),
                ));
            }
        };

        let subject = match introspection.subject.as_deref() {
            Some(subject) if introspection.active => subject.to_string(),
            _ => {
                return Err(Box::new(ForwardAuthResponse::error(401, "inactive_token")));
            }
        };

        let session_id = introspection.session_id().map(String::from);
        let query = IdentityQuery {
            user_id: subject,
            org_id,
            membership_id: None,
            include_groups: true,
        };
        let mut identity = match self.resolver.effective_identity(query).await {
            Ok(identity) => identity,
            Err(error) => {
                tracing::error!(error = %error, "identity resolution failed");
                return Err(Box::new(
                    ForwardAuthResponse::error(502, "identity_resolution_error")
                        .with_header(headers::FORWARD_AUTH_ERROR_MESSAGE, error.to_string()),
                ));
            }
        };
        identity.session_id = session_id;
        Ok(identity)
    }

    async fn resolve_api_key(
        &self,
        secret: &str,
        org_id: Option<String>,
    ) -> Result<EffectiveIdentity, Box<ForwardAuthResponse>> {
        let Some(keys) = &self.keys else {
            return Err(Box::new(ForwardAuthResponse::error(
                500,
                "api_key_not_supported",
            )));
        };

        let hash = hash_key_secret(secret);
        let key = match keys.get_key_by_hash(&hash).await {
            Ok(key) => key,
            Err(error) => {
                tracing::error!(error = %error, "API key lookup failed");
                return Err(Box::new(
                    ForwardAuthResponse::error(502, "api_key_lookup_failed")
                        .with_header(headers::FORWARD_AUTH_ERROR_MESSAGE, error.to_string()),
                ));
            }
        };
        let Some(key) = key else {
            return Err(Box::new(ForwardAuthResponse::error(401, "invalid_api_key")));
        };
        if !key.is_active(OffsetDateTime::now_utc()) {
            return Err(Box::new(ForwardAuthResponse::error(403, "api_key_inactive")));
        }

        let identity = self.key_identity(&key, org_id).await?;

        // Fire-and-forget usage write: the response never waits on its
        // outcome being durable.
        if let Err(error) = keys.record_key_usage(&key.id, None).await {
            tracing::warn!(key_id = %key.id, error = %error, "key usage write failed");
        }

        Ok(identity)
    }

    async fn key_identity(
        &self,
        key: &Key,
        org_id: Option<String>,
    ) -> Result<EffectiveIdentity, Box<ForwardAuthResponse>> {
        if key.owner.kind == KeyOwnerKind::User {
            let query = IdentityQuery {
                user_id: key.owner.id.clone(),
                org_id,
                membership_id: None,
                include_groups: true,
            };
            let mut identity = match self.resolver.effective_identity(query).await {
                Ok(identity) => identity,
                Err(error) => {
                    tracing::error!(error = %error, "identity resolution failed for key owner");
                    return Err(Box::new(
                        ForwardAuthResponse::error(502, "identity_resolution_error")
                            .with_header(headers::FORWARD_AUTH_ERROR_MESSAGE, error.to_string()),
                    ));
                }
            };
            // Key labels win over identity labels; scopes union.
            identity.labels = merge_labels([&identity.labels, &key.labels]);
            identity.scopes = dedupe_scopes(
                identity
                    .scopes
                    .iter()
                    .chain(key.scopes.iter())
                    .cloned()
                    .collect::<Vec<_>>(),
            );
            return Ok(identity);
        }

        // Org and service keys get a synthetic principal.
        Ok(EffectiveIdentity {
            user_id: format!("key:{}", key.id),
            org_id: if key.owner.kind == KeyOwnerKind::Org {
                Some(key.owner.id.clone())
            } else {
                org_id
            },
            session_id: None,
            groups: Vec::new(),
            labels: key.labels.clone(),
            roles: Vec::new(),
            entitlements: Vec::new(),
            scopes: dedupe_scopes(key.scopes.clone()),
        })
    }

    /// Best-effort session touch; read-then-touch stays sequential within
    /// this request, and every failure is a log line, never a response.
    async fn touch_session(
        &self,
        identity: &EffectiveIdentity,
        headers: &BTreeMap<String, String>,
    ) {
        let (Some(sessions), Some(session_id)) = (&self.sessions, &identity.session_id) else {
            return;
        };
        if identity.user_id.is_empty() {
            return;
        }
        if let Err(error) = self
            .touch_session_inner(sessions, session_id, &identity.user_id, headers)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %error, "session touch failed");
        }
    }

    async fn touch_session_inner(
        &self,
        sessions: &Arc<dyn SessionStore>,
        session_id: &str,
        user_id: &str,
        headers: &BTreeMap<String, String>,
    ) -> CatalystResult<()> {
        let envelope = forward_auth_envelope(headers);
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = sessions.get_session(session_id).await? {
            let metadata = deep_merge(
                existing.metadata.unwrap_or(Value::Null),
                envelope,
            );
            sessions
                .touch_session(
                    session_id,
                    SessionTouch {
                        last_seen_at: now,
                        metadata: Some(metadata),
                    },
                )
                .await?;
            return Ok(());
        }

        // Unknown locally: seed from the IdP's view of the session.
        let seed = self
            .idp
            .list_active_sessions(user_id)
            .await?
            .into_iter()
            .find(|s| s.id == session_id);
        let (created_at, factors, idp_metadata) = match seed {
            Some(seed) => (seed.created_at, seed.factors, seed.metadata),
            None => (None, Vec::new(), None),
        };
        let metadata = deep_merge(idp_metadata.unwrap_or(Value::Null), envelope.clone());

        let created = sessions
            .create_session(NewSession {
                id: session_id.to_string(),
                user_id: user_id.to_string(),
                created_at,
                factors_verified: factors,
                metadata: Some(metadata),
            })
            .await;
        match created {
            Ok(_) => Ok(()),
            // Lost a create race: fall back to a touch.
            Err(CatalystError::DuplicateId { .. }) => {
                let existing = sessions.get_session(session_id).await?;
                let metadata = deep_merge(
                    existing.and_then(|s| s.metadata).unwrap_or(Value::Null),
                    envelope,
                );
                sessions
                    .touch_session(
                        session_id,
                        SessionTouch {
                            last_seen_at: now,
                            metadata: Some(metadata),
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn build_environment(
        &self,
        headers: &BTreeMap<String, String>,
        request: &ForwardAuthRequest,
    ) -> Map<String, Value> {
        let mut environment = Map::new();
        for (name, value) in headers {
            if let Some(key) = name.strip_prefix(&self.config.env_header_prefix)
                && !key.is_empty()
            {
                environment.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        // Explicit request environment wins on conflict.
        if let Some(explicit) = &request.environment {
            for (key, value) in explicit {
                environment.insert(key.clone(), value.clone());
            }
        }
        environment
    }

    fn render_allow(
        &self,
        identity: &EffectiveIdentity,
        decision: &Decision,
    ) -> ForwardAuthResponse {
        let mut response_headers = BTreeMap::new();
        response_headers.insert(headers::USER_SUB.to_string(), identity.user_id.clone());
        if let Some(org_id) = &identity.org_id {
            response_headers.insert(headers::ORG_ID.to_string(), org_id.clone());
        }
        if let Some(session_id) = &identity.session_id {
            response_headers.insert(headers::SESSION_ID.to_string(), session_id.clone());
        }
        if !identity.groups.is_empty() {
            response_headers.insert(headers::USER_GROUPS.to_string(), identity.groups.join(","));
        }
        if !identity.roles.is_empty() {
            response_headers.insert(headers::USER_ROLES.to_string(), identity.roles.join(","));
        }
        if !identity.entitlements.is_empty() {
            response_headers.insert(
                headers::USER_ENTITLEMENTS.to_string(),
                identity.entitlements.join(","),
            );
        }
        let scopes = dedupe_scopes(identity.scopes.clone());
        if !scopes.is_empty() {
            response_headers.insert(headers::USER_SCOPES.to_string(), scopes.join(","));
        }
        response_headers.insert(
            headers::USER_LABELS.to_string(),
            serde_json::to_string(&identity.labels).unwrap_or_else(|_| "{}".to_string()),
        );
        if let Some(token) = &decision.decision_jwt {
            response_headers.insert(headers::DECISION_JWT.to_string(), token.clone());
        }
        if let Some(reason) = &decision.reason {
            response_headers.insert(headers::FORWARD_AUTH_REASON.to_string(), reason.clone());
        }
        if let Some(obligations) = &decision.obligations {
            response_headers.insert(
                headers::POLICY_OBLIGATIONS.to_string(),
                obligations.to_string(),
            );
        }
        ForwardAuthResponse::allow(response_headers)
    }

    async fn store_decision(&self, token: &str, response: &ForwardAuthResponse) {
        let Some(cache) = &self.cache else { return };
        let ttl = self.config.decision_ttl();
        let entry = DecisionCacheEntry {
            headers: response.headers.clone(),
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(ttl as i64),
        };
        if let Err(error) = cache
            .set(
                &self.config.cache_key(token),
                entry,
                CacheSetOptions {
                    ttl_seconds: ttl,
                    tags: Vec::new(),
                },
            )
            .await
        {
            tracing::warn!(error = %error, "decision cache write failed");
        }
    }

    async fn audit_decision(&self, token: &str, identity: &EffectiveIdentity) {
        let Some(audit) = &self.audit else { return };
        let event = NewAuditEvent::new("forward_auth", "decision_cached")
            .with_actor(identity.user_id.clone())
            .with_resource(token)
            .with_metadata(json!({
                "userId": identity.user_id,
                "orgId": identity.org_id,
                "sessionId": identity.session_id,
            }));
        if let Err(error) = audit.append_event(event).await {
            tracing::warn!(error = %error, "audit append failed");
        }
    }
}

/// Builds the `{forwardAuth: {...}}` metadata envelope from forwarding
/// headers, including only the fields that are present.
fn forward_auth_envelope(headers: &BTreeMap<String, String>) -> Value {
    let mut fields = Map::new();
    if let Some(ip) = client_ip(headers) {
        fields.insert("ip".to_string(), Value::String(ip));
    }
    if let Some(user_agent) = headers.get(headers::USER_AGENT) {
        fields.insert("userAgent".to_string(), Value::String(user_agent.clone()));
    }
    if let Some(host) = headers.get(headers::FORWARDED_HOST) {
        fields.insert("host".to_string(), Value::String(host.clone()));
    }
    if let Some(protocol) = headers.get(headers::FORWARDED_PROTO) {
        fields.insert("protocol".to_string(), Value::String(protocol.clone()));
    }
    if let Some(port) = headers.get(headers::FORWARDED_PORT) {
        fields.insert("port".to_string(), Value::String(port.clone()));
    }
    if let Some(forwarded_for) = headers.get(headers::FORWARDED_FOR) {
        fields.insert(
            "forwardedFor".to_string(),
            Value::String(forwarded_for.clone()),
        );
    }
    json!({ "forwardAuth": Value::Object(fields) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalyst_core::{AuditFilter, KeyOwner, LabelSet, NewKey, labels};
    use catalyst_idp::{IdpGroup, IdpSession, IdpUser, TokenIntrospection, TokenSet};
    use catalyst_storage::{MemoryAuditLog, MemoryKeyStore, MemorySessionStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Mock ports
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct MockIdp {
        introspections: HashMap<String, TokenIntrospection>,
        sessions: Vec<IdpSession>,
        fail_introspection: bool,
        introspection_calls: AtomicUsize,
    }

    impl MockIdp {
        fn with_active_token(token: &str, subject: &str, session_id: Option<&str>) -> Self {
            let mut claims = serde_json::Map::new();
            if let Some(sid) = session_id {
                claims.insert("sid".into(), Value::String(sid.into()));
            }
            let mut idp = Self::default();
            idp.introspections.insert(
                token.to_string(),
                TokenIntrospection {
                    active: true,
                    subject: Some(subject.to_string()),
                    expires_at: None,
                    claims,
                },
            );
            idp
        }
    }

    #[async_trait]
    impl IdentityProvider for MockIdp {
        async fn validate_access_token(
            &self,
            token: &str,
        ) -> CatalystResult<TokenIntrospection> {
            self.introspection_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_introspection {
                return Err(CatalystError::identity_provider("upstream 503", true));
            }
            Ok(self
                .introspections
                .get(token)
                .cloned()
                .unwrap_or_else(TokenIntrospection::inactive))
        }

        async fn exchange_code(&self, _: &str, _: &str) -> CatalystResult<TokenSet> {
            unimplemented!()
        }

        async fn refresh_token(&self, _: &str) -> CatalystResult<TokenSet> {
            unimplemented!()
        }

        async fn get_user(&self, _: &str) -> CatalystResult<IdpUser> {
            unimplemented!()
        }

        async fn list_active_sessions(&self, _: &str) -> CatalystResult<Vec<IdpSession>> {
            Ok(self.sessions.clone())
        }

        async fn list_groups(&self, _: &str) -> CatalystResult<Vec<IdpGroup>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MapResolver {
        identities: HashMap<String, EffectiveIdentity>,
    }

    impl MapResolver {
        fn with_identity(user_id: &str, identity: EffectiveIdentity) -> Self {
            let mut resolver = Self::default();
            resolver.identities.insert(user_id.to_string(), identity);
            resolver
        }
    }

    #[async_trait]
    impl IdentityResolver for MapResolver {
        async fn effective_identity(
            &self,
            query: IdentityQuery,
        ) -> CatalystResult<EffectiveIdentity> {
            let mut identity = self
                .identities
                .get(&query.user_id)
                .cloned()
                .ok_or_else(|| CatalystError::not_found(format!("user {}", query.user_id)))?;
            if let Some(org_id) = query.org_id {
                identity.org_id = Some(org_id);
            }
            Ok(identity)
        }
    }

    struct FixedPolicy {
        decision: Decision,
        calls: AtomicUsize,
    }

    impl FixedPolicy {
        fn allowing(decision_jwt: Option<&str>) -> Self {
            let mut decision = Decision::allow();
            decision.decision_jwt = decision_jwt.map(String::from);
            Self {
                decision,
                calls: AtomicUsize::new(0),
            }
        }

        fn denying(reason: &str) -> Self {
            Self {
                decision: Decision::deny(reason),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PolicyEngine for FixedPolicy {
        async fn evaluate(&self, _: &PolicyInput) -> CatalystResult<Decision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision.clone())
        }
    }

    fn identity(user_id: &str) -> EffectiveIdentity {
        EffectiveIdentity {
            user_id: user_id.into(),
            org_id: Some("org-77".into()),
            scopes: vec!["base".into()],
            labels: labels([("plan", "starter")]),
            ..EffectiveIdentity::default()
        }
    }

    fn service(
        idp: Arc<MockIdp>,
        resolver: Arc<MapResolver>,
        policy: Arc<FixedPolicy>,
    ) -> ForwardAuthService {
        ForwardAuthService::new(GatewayConfig::default(), idp, resolver, policy)
    }

    // -------------------------------------------------------------------------
    // Scenario A: cached decision short-circuit
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cached_decision_short_circuits() {
        let idp = Arc::new(MockIdp::default());
        let cache = Arc::new(catalyst_cache::MemoryDecisionCache::new());
        let audit = Arc::new(MemoryAuditLog::new());

        cache
            .set(
                "forward-auth:decision:decision.jwt",
                DecisionCacheEntry {
                    headers: BTreeMap::from([
                        ("x-user-sub".to_string(), "user-1".to_string()),
                        ("x-org-id".to_string(), "org-9".to_string()),
                        ("x-decision-jwt".to_string(), "decision.jwt".to_string()),
                    ]),
                    expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(30),
                },
                CacheSetOptions {
                    ttl_seconds: 30,
                    tags: vec![],
                },
            )
            .await
            .unwrap();

        let svc = service(
            idp.clone(),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_cache(cache)
        .with_audit_store(audit.clone());

        let request = ForwardAuthRequest::new("GET", "/space")
            .with_header("x-decision-jwt", "decision.jwt");
        let response = svc.handle(&request).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-user-sub").unwrap(), "user-1");
        assert_eq!(response.headers.get("x-org-id").unwrap(), "org-9");
        assert_eq!(response.headers.get("x-decision-jwt").unwrap(), "decision.jwt");
        // The IdP is not consulted and no audit event is appended.
        assert_eq!(idp.introspection_calls.load(Ordering::SeqCst), 0);
        assert!(audit.list_events(AuditFilter::default()).await.unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // Scenario B: inactive access token
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_inactive_token_is_401() {
        let policy = Arc::new(FixedPolicy::allowing(None));
        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            policy.clone(),
        );

        let request =
            ForwardAuthRequest::new("GET", "/x").with_header("authorization", "Bearer dead");
        let response = svc.handle(&request).await;

        assert_eq!(response.status, 401);
        assert_eq!(
            response.headers.get("x-forward-auth-error").unwrap(),
            "inactive_token"
        );
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);
    }

    // -------------------------------------------------------------------------
    // Scenario C: API key allow with usage recording
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_api_key_allow_merges_and_records_usage() {
        let keys = Arc::new(MemoryKeyStore::new());
        let mut input = NewKey::new(hash_key_secret("key-secret"), KeyOwner::user("user-55"));
        input.id = Some("key-1".into());
        input.scopes = vec!["read".into()];
        input.labels = labels([("tier", "gold")]);
        let issued = keys.issue_key(input).await.unwrap();

        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::with_identity("user-55", identity("user-55"))),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_key_store(keys.clone());

        let request = ForwardAuthRequest::new("GET", "/r").with_header("x-api-key", "key-secret");
        let response = svc.handle(&request).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-user-sub").unwrap(), "user-55");

        let merged_labels: LabelSet =
            serde_json::from_str(response.headers.get("x-user-labels").unwrap()).unwrap();
        assert_eq!(
            merged_labels.get("tier"),
            Some(&catalyst_core::LabelValue::from("gold"))
        );
        assert_eq!(
            merged_labels.get("plan"),
            Some(&catalyst_core::LabelValue::from("starter"))
        );

        let scopes = response.headers.get("x-user-scopes").unwrap();
        assert!(scopes.contains("base") && scopes.contains("read"));

        let key = keys.get_key_by_id(&issued.id).await.unwrap().unwrap();
        assert_eq!(key.usage_count, 1);
        assert!(key.last_used_at.is_some());
    }

    // -------------------------------------------------------------------------
    // Scenario D: policy deny
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_policy_deny_is_403_with_reason() {
        let svc = service(
            Arc::new(MockIdp::with_active_token("ok", "user-1", None)),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            Arc::new(FixedPolicy::denying("nope")),
        );

        let request =
            ForwardAuthRequest::new("POST", "/secure").with_header("authorization", "Bearer ok");
        let response = svc.handle(&request).await;

        assert_eq!(response.status, 403);
        assert_eq!(response.headers.get("x-forward-auth-error").unwrap(), "nope");
    }

    // -------------------------------------------------------------------------
    // Invariants and boundaries
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_credentials_is_401() {
        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        );
        let response = svc.handle(&ForwardAuthRequest::new("GET", "/x")).await;
        assert_eq!(response.status, 401);
        assert_eq!(
            response.headers.get("x-forward-auth-error").unwrap(),
            "missing_credentials"
        );
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_missing_credentials() {
        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        );
        let request = ForwardAuthRequest::new("GET", "/x")
            .with_header("authorization", "Basic dXNlcjpwYXNz");
        let response = svc.handle(&request).await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_api_key_without_store_is_500() {
        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        );
        let request = ForwardAuthRequest::new("GET", "/x").with_header("x-api-key", "s");
        let response = svc.handle(&request).await;
        assert_eq!(response.status, 500);
        assert_eq!(
            response.headers.get("x-forward-auth-error").unwrap(),
            "api_key_not_supported"
        );
    }

    #[tokio::test]
    async fn test_unknown_api_key_is_401_and_expired_is_403() {
        let keys = Arc::new(MemoryKeyStore::new());
        let mut input = NewKey::new(hash_key_secret("old-secret"), KeyOwner::service("svc-1"));
        input.expires_at = Some(OffsetDateTime::now_utc() - time::Duration::hours(1));
        keys.issue_key(input).await.unwrap();

        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_key_store(keys);

        let unknown = ForwardAuthRequest::new("GET", "/x").with_header("x-api-key", "wrong");
        assert_eq!(svc.handle(&unknown).await.status, 401);

        let expired = ForwardAuthRequest::new("GET", "/x").with_header("x-api-key", "old-secret");
        let response = svc.handle(&expired).await;
        assert_eq!(response.status, 403);
        assert_eq!(
            response.headers.get("x-forward-auth-error").unwrap(),
            "api_key_inactive"
        );
    }

    #[tokio::test]
    async fn test_org_key_synthesizes_identity() {
        let keys = Arc::new(MemoryKeyStore::new());
        let mut input = NewKey::new(hash_key_secret("org-secret"), KeyOwner::org("org-3"));
        input.id = Some("key-9".into());
        input.scopes = vec!["deploy".into(), "deploy".into()];
        keys.issue_key(input).await.unwrap();

        let svc = service(
            Arc::new(MockIdp::default()),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_key_store(keys);

        let request = ForwardAuthRequest::new("GET", "/x").with_header("x-api-key", "org-secret");
        let response = svc.handle(&request).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-user-sub").unwrap(), "key:key-9");
        assert_eq!(response.headers.get("x-org-id").unwrap(), "org-3");
        assert_eq!(response.headers.get("x-user-scopes").unwrap(), "deploy");
    }

    #[tokio::test]
    async fn test_cache_round_trip_reproduces_allow_response() {
        let cache = Arc::new(catalyst_cache::MemoryDecisionCache::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let svc = service(
            Arc::new(MockIdp::with_active_token("ok", "user-1", None)),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            Arc::new(FixedPolicy::allowing(Some("tok.1"))),
        )
        .with_cache(cache)
        .with_audit_store(audit.clone());

        let request =
            ForwardAuthRequest::new("GET", "/x").with_header("authorization", "Bearer ok");
        let original = svc.handle(&request).await;
        assert_eq!(original.status, 200);

        // Exactly one decision_cached audit event.
        let events = audit.list_events(AuditFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "decision_cached");
        assert_eq!(events[0].resource.as_deref(), Some("tok.1"));

        // A follow-up with only the token reproduces the response.
        let cached_request =
            ForwardAuthRequest::new("GET", "/x").with_header("x-decision-jwt", "tok.1");
        let cached = svc.handle(&cached_request).await;
        assert_eq!(cached.status, 200);
        assert_eq!(cached.headers, original.headers);

        // And appends no further audit events.
        let events = audit.list_events(AuditFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_no_audit_event_without_decision_token() {
        let audit = Arc::new(MemoryAuditLog::new());
        let svc = service(
            Arc::new(MockIdp::with_active_token("ok", "user-1", None)),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_audit_store(audit.clone());

        let request =
            ForwardAuthRequest::new("GET", "/x").with_header("authorization", "Bearer ok");
        assert_eq!(svc.handle(&request).await.status, 200);
        assert!(audit.list_events(AuditFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idp_failure_is_502() {
        let mut idp = MockIdp::default();
        idp.fail_introspection = true;
        let svc = service(
            Arc::new(idp),
            Arc::new(MapResolver::default()),
            Arc::new(FixedPolicy::allowing(None)),
        );

        let request =
            ForwardAuthRequest::new("GET", "/x").with_header("authorization", "Bearer t");
        let response = svc.handle(&request).await;
        assert_eq!(response.status, 502);
        assert_eq!(
            response.headers.get("x-forward-auth-error").unwrap(),
            "token_validation_error"
        );
        assert!(response.headers.contains_key("x-forward-auth-error-message"));
    }

    #[tokio::test]
    async fn test_session_touch_seeds_from_idp() {
        let sessions = Arc::new(MemorySessionStore::new());
        let mut idp = MockIdp::with_active_token("ok", "user-1", Some("sess-7"));
        idp.sessions = vec![IdpSession {
            id: "sess-7".into(),
            created_at: Some(OffsetDateTime::now_utc() - time::Duration::hours(2)),
            factors: vec!["password".into()],
            metadata: Some(json!({"device": "laptop"})),
        }];

        let svc = service(
            Arc::new(idp),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_session_store(sessions.clone());

        let request = ForwardAuthRequest::new("GET", "/x")
            .with_header("authorization", "Bearer ok")
            .with_header("x-forwarded-for", "10.1.1.1, 10.0.0.2")
            .with_header("user-agent", "curl/8");
        let response = svc.handle(&request).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-session-id").unwrap(), "sess-7");

        let session = sessions.get_session("sess-7").await.unwrap().unwrap();
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.factors_verified, vec!["password"]);
        let metadata = session.metadata.unwrap();
        assert_eq!(metadata["device"], "laptop");
        assert_eq!(metadata["forwardAuth"]["ip"], "10.1.1.1");
        assert_eq!(metadata["forwardAuth"]["userAgent"], "curl/8");
    }

    #[tokio::test]
    async fn test_session_touch_merges_existing_metadata() {
        let sessions = Arc::new(MemorySessionStore::new());
        sessions
            .create_session(NewSession {
                id: "sess-7".into(),
                user_id: "user-1".into(),
                created_at: None,
                factors_verified: vec![],
                metadata: Some(json!({"forwardAuth": {"host": "old"}, "keep": true})),
            })
            .await
            .unwrap();

        let svc = service(
            Arc::new(MockIdp::with_active_token("ok", "user-1", Some("sess-7"))),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            Arc::new(FixedPolicy::allowing(None)),
        )
        .with_session_store(sessions.clone());

        let request = ForwardAuthRequest::new("GET", "/x")
            .with_header("authorization", "Bearer ok")
            .with_header("x-forwarded-host", "app.example.com");
        assert_eq!(svc.handle(&request).await.status, 200);

        let metadata = sessions
            .get_session("sess-7")
            .await
            .unwrap()
            .unwrap()
            .metadata
            .unwrap();
        assert_eq!(metadata["keep"], true);
        assert_eq!(metadata["forwardAuth"]["host"], "app.example.com");
    }

    #[tokio::test]
    async fn test_environment_headers_reach_policy() {
        struct CapturingPolicy {
            captured: tokio::sync::Mutex<Option<PolicyInput>>,
        }

        #[async_trait]
        impl PolicyEngine for CapturingPolicy {
            async fn evaluate(&self, input: &PolicyInput) -> CatalystResult<Decision> {
                *self.captured.lock().await = Some(input.clone());
                Ok(Decision::allow())
            }
        }

        let policy = Arc::new(CapturingPolicy {
            captured: tokio::sync::Mutex::new(None),
        });
        let svc = ForwardAuthService::new(
            GatewayConfig::default(),
            Arc::new(MockIdp::with_active_token("ok", "user-1", None)),
            Arc::new(MapResolver::with_identity("user-1", identity("user-1"))),
            policy.clone(),
        );

        let mut request = ForwardAuthRequest::new("get", "/thing")
            .with_header("authorization", "Bearer ok")
            .with_header("x-forward-auth-env-region", "eu-1");
        request.environment = Some(
            json!({"stage": "prod"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        assert_eq!(svc.handle(&request).await.status, 200);

        let input = policy.captured.lock().await.clone().unwrap();
        assert_eq!(input.action, "GET /thing");
        assert_eq!(input.environment["region"], "eu-1");
        assert_eq!(input.environment["stage"], "prod");
    }
}
