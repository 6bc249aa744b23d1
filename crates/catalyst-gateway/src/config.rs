//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the forward-auth pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Prefix for decision-cache keys; the full key is
    /// `<prefix>:<decision token>`.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Decision cache TTL in seconds. Clamped to at least 1.
    #[serde(default = "default_decision_ttl_seconds")]
    pub decision_ttl_seconds: u64,

    /// Headers starting with this prefix are carried into the policy
    /// environment, keyed by the remainder of the name.
    #[serde(default = "default_env_header_prefix")]
    pub env_header_prefix: String,

    /// Header carrying the org hint.
    #[serde(default = "default_org_header")]
    pub org_header: String,
}

fn default_cache_prefix() -> String {
    "forward-auth:decision".to_string()
}

fn default_decision_ttl_seconds() -> u64 {
    55
}

fn default_env_header_prefix() -> String {
    "x-forward-auth-env-".to_string()
}

fn default_org_header() -> String {
    "x-catalyst-org".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_prefix: default_cache_prefix(),
            decision_ttl_seconds: default_decision_ttl_seconds(),
            env_header_prefix: default_env_header_prefix(),
            org_header: default_org_header(),
        }
    }
}

impl GatewayConfig {
    /// The effective TTL, never below one second.
    #[must_use]
    pub fn decision_ttl(&self) -> u64 {
        self.decision_ttl_seconds.max(1)
    }

    /// The cache key for a decision token.
    #[must_use]
    pub fn cache_key(&self, decision_token: &str) -> String {
        format!("{}:{}", self.cache_prefix, decision_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache_key("tok"), "forward-auth:decision:tok");
        assert_eq!(config.decision_ttl(), 55);
    }

    #[test]
    fn test_ttl_floor() {
        let config = GatewayConfig {
            decision_ttl_seconds: 0,
            ..GatewayConfig::default()
        };
        assert_eq!(config.decision_ttl(), 1);
    }
}
