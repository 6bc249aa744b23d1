//! The Authentik HTTP client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use time::OffsetDateTime;

use catalyst_core::{CatalystError, CatalystResult};

use crate::config::AuthentikConfig;
use crate::decode;
use crate::types::{IdpGroup, IdpSession, IdpUser, TokenIntrospection, TokenSet};

/// The identity-provider port consumed by the gateway and the SDK.
///
/// The production implementation is [`AuthentikClient`]; tests substitute
/// in-process fakes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validates an access token via introspection.
    ///
    /// # Errors
    ///
    /// Returns an `IdentityProvider` infrastructure error when the call
    /// fails; an inactive token is a value, not an error.
    async fn validate_access_token(&self, token: &str) -> CatalystResult<TokenIntrospection>;

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `TOKEN_RESPONSE_INCOMPLETE` on malformed upstream payloads
    /// or an infrastructure error when the call fails.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> CatalystResult<TokenSet>;

    /// Refreshes an access token.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`IdentityProvider::exchange_code`].
    async fn refresh_token(&self, refresh_token: &str) -> CatalystResult<TokenSet>;

    /// Reads a user record from the admin API.
    ///
    /// # Errors
    ///
    /// Returns `AUTHENTIK_PROFILE_INCOMPLETE` on payloads without an id
    /// or email, or an infrastructure error when the call fails.
    async fn get_user(&self, user_id: &str) -> CatalystResult<IdpUser>;

    /// Lists a user's active sessions.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error when the call fails.
    async fn list_active_sessions(&self, user_id: &str) -> CatalystResult<Vec<IdpSession>>;

    /// Lists a user's groups.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error when the call fails.
    async fn list_groups(&self, user_id: &str) -> CatalystResult<Vec<IdpGroup>>;
}

/// HTTP implementation of [`IdentityProvider`] against Authentik.
pub struct AuthentikClient {
    config: AuthentikConfig,
    http: reqwest::Client,
}

impl AuthentikClient {
    /// Creates a client with a fresh connection pool.
    #[must_use]
    pub fn new(config: AuthentikConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Maps a transport-level failure to a retryable infra error.
    fn transport_error(context: &str, error: &reqwest::Error) -> CatalystError {
        CatalystError::identity_provider(format!("{context}: {error}"), true)
    }

    /// Maps a non-2xx status to an infra error; 5xx and 429 are retryable.
    fn status_error(context: &str, status: StatusCode) -> CatalystError {
        let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
        tracing::debug!(context, status = status.as_u16(), retryable, "IdP call failed");
        CatalystError::identity_provider(format!("{context}: HTTP {}", status.as_u16()), retryable)
    }

    async fn post_token_form(&self, context: &str, form: &[(&str, &str)]) -> CatalystResult<TokenSet> {
        let url = self.config.endpoint(&self.config.token_path, None)?;
        let response = self
            .http
            .post(url)
            .timeout(self.config.request_timeout())
            .form(form)
            .send()
            .await
            .map_err(|e| Self::transport_error(context, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(context, status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::transport_error(context, &e))?;
        decode::decode_token_response(&body, OffsetDateTime::now_utc())
    }

    async fn get_admin_json(&self, context: &str, template: &str, id: &str) -> CatalystResult<Value> {
        let url = self.config.endpoint(template, Some(id))?;
        let response = self
            .http
            .get(url)
            .timeout(self.config.request_timeout())
            .bearer_auth(&self.config.admin_token)
            .send()
            .await
            .map_err(|e| Self::transport_error(context, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(context, status));
        }
        response
            .json()
            .await
            .map_err(|e| Self::transport_error(context, &e))
    }
}

#[async_trait]
impl IdentityProvider for AuthentikClient {
    async fn validate_access_token(&self, token: &str) -> CatalystResult<TokenIntrospection> {
        let context = "token introspection";
        let url = self.config.endpoint(&self.config.introspection_path, None)?;
        let response = self
            .http
            .post(url)
            .timeout(self.config.introspection_timeout())
            .form(&[
                ("token", token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::transport_error(context, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(context, status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::transport_error(context, &e))?;
        Ok(decode::decode_introspection(&body))
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> CatalystResult<TokenSet> {
        self.post_token_form(
            "authorization-code exchange",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> CatalystResult<TokenSet> {
        self.post_token_form(
            "token refresh",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn get_user(&self, user_id: &str) -> CatalystResult<IdpUser> {
        let body = self
            .get_admin_json("user read", &self.config.user_path, user_id)
            .await?;
        decode::decode_user(&body)
    }

    async fn list_active_sessions(&self, user_id: &str) -> CatalystResult<Vec<IdpSession>> {
        let body = self
            .get_admin_json("session listing", &self.config.sessions_path, user_id)
            .await?;
        Ok(decode::decode_sessions(&body))
    }

    async fn list_groups(&self, user_id: &str) -> CatalystResult<Vec<IdpGroup>> {
        let body = self
            .get_admin_json("group listing", &self.config.groups_path, user_id)
            .await?;
        Ok(decode::decode_groups(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> AuthentikClient {
        let config = AuthentikConfig::new(
            Url::parse(&server.uri()).unwrap(),
            "cid",
            "csecret",
            "admin-token",
        );
        AuthentikClient::new(config)
    }

    #[tokio::test]
    async fn test_introspection_active_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/application/o/introspect/"))
            .and(body_string_contains("token=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "sub": "user-1",
                "exp": 4102444800i64,
                "sid": "sess-1"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.validate_access_token("abc").await.unwrap();
        assert!(result.active);
        assert_eq!(result.subject.as_deref(), Some("user-1"));
        assert_eq!(result.session_id(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_introspection_5xx_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/application/o/introspect/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.validate_access_token("abc").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_introspection_4xx_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/application/o/introspect/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.validate_access_token("abc").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/application/o/token/"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.exchange_code("c", "https://app/cb").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_exchange_code_decodes_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/application/o/token/"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 600
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tokens = client.exchange_code("c", "https://app/cb").await.unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token, "rt");
    }

    #[tokio::test]
    async fn test_get_user_sends_admin_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/core/users/user-1/"))
            .and(header("authorization", "Bearer admin-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pk": 7,
                "uuid": "user-1",
                "email": "a@b.c"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let user = client.get_user("user-1").await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email, "a@b.c");
    }

    #[tokio::test]
    async fn test_list_sessions_results_wrapper() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/core/users/user-1/sessions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"uuid": "s1", "factors": ["password"]}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let sessions = client.list_active_sessions("user-1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
    }
}
