//! Authentik adapter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use catalyst_core::{CatalystError, CatalystResult};

/// Configuration for the Authentik HTTP adapter.
///
/// Path templates use an `{id}` placeholder for per-user endpoints. The
/// defaults match a stock Authentik deployment; overrides exist for
/// proxied or re-mounted installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthentikConfig {
    /// Base URL of the IdP (e.g. `https://auth.example.com`).
    pub base_url: Url,

    /// OAuth client id used for token and introspection calls.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Admin API token sent as `Authorization: Bearer` on directory reads.
    pub admin_token: String,

    /// Token endpoint path.
    #[serde(default = "default_token_path")]
    pub token_path: String,

    /// Introspection endpoint path.
    #[serde(default = "default_introspection_path")]
    pub introspection_path: String,

    /// User read path template.
    #[serde(default = "default_user_path")]
    pub user_path: String,

    /// Session listing path template.
    #[serde(default = "default_sessions_path")]
    pub sessions_path: String,

    /// Group listing path template.
    #[serde(default = "default_groups_path")]
    pub groups_path: String,

    /// Timeout for introspection calls, in milliseconds.
    #[serde(default = "default_introspection_timeout_ms")]
    pub introspection_timeout_ms: u64,

    /// Timeout for every other call, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_token_path() -> String {
    "/application/o/token/".to_string()
}

fn default_introspection_path() -> String {
    "/application/o/introspect/".to_string()
}

fn default_user_path() -> String {
    "/api/v3/core/users/{id}/".to_string()
}

fn default_sessions_path() -> String {
    "/api/v3/core/users/{id}/sessions/".to_string()
}

fn default_groups_path() -> String {
    "/api/v3/core/users/{id}/groups/".to_string()
}

fn default_introspection_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl AuthentikConfig {
    /// Creates a config with default paths and timeouts.
    #[must_use]
    pub fn new(
        base_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        admin_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            admin_token: admin_token.into(),
            token_path: default_token_path(),
            introspection_path: default_introspection_path(),
            user_path: default_user_path(),
            sessions_path: default_sessions_path(),
            groups_path: default_groups_path(),
            introspection_timeout_ms: default_introspection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// Resolves a path (with `{id}` substituted) against the base URL.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the joined URL is invalid.
    pub fn endpoint(&self, template: &str, id: Option<&str>) -> CatalystResult<Url> {
        let path = match id {
            Some(id) => template.replace("{id}", id),
            None => template.to_string(),
        };
        self.base_url.join(&path).map_err(|e| {
            CatalystError::configuration(format!("invalid IdP endpoint '{path}': {e}"))
        })
    }

    /// Timeout applied to introspection calls.
    #[must_use]
    pub fn introspection_timeout(&self) -> Duration {
        Duration::from_millis(self.introspection_timeout_ms)
    }

    /// Timeout applied to every other call.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
