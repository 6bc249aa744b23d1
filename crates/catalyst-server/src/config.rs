//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use catalyst_gateway::GatewayConfig;
use catalyst_idp::AuthentikConfig;
use catalyst_policy::{DefaultDecision, Rule};
use catalyst_webhooks::WorkerConfig;

/// Top-level server configuration, loaded from `catalyst.toml` plus
/// `CATALYST_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// IdP adapter settings; required to serve traffic.
    #[serde(default)]
    pub idp: Option<AuthentikConfig>,
    /// Forward-auth pipeline settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Delivery worker settings.
    #[serde(default)]
    pub webhooks: WebhookSettings,
    /// Storage backend selection.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Built-in policy rules.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route for the forward-auth endpoint.
    #[serde(default = "default_auth_path")]
    pub auth_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_auth_path() -> String {
    "/auth".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_path: default_auth_path(),
        }
    }
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Whether the worker runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Worker tunables.
    #[serde(flatten)]
    pub worker: WorkerConfig,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            worker: WorkerConfig::default(),
        }
    }
}

impl WebhookSettings {
    /// The poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum StorageConfig {
    /// In-memory stores; state dies with the process.
    Memory,
    /// PostgreSQL stores.
    Postgres {
        /// Connection URL.
        url: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Built-in policy evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Ordered rules; first match wins.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Decision when no rule matches.
    #[serde(default)]
    pub default_decision: DefaultDecision,
    /// Mint opaque decision tokens on allow, enabling the cache.
    #[serde(default = "default_true")]
    pub mint_decision_tokens: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_decision: DefaultDecision::default(),
            mint_decision_tokens: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`trace` … `error`, or an `EnvFilter` directive).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if !self.server.auth_path.starts_with('/') {
            return Err("server.auth_path must start with '/'".into());
        }
        if self.idp.is_none() {
            return Err("idp configuration is required".into());
        }
        if self.webhooks.poll_interval_ms == 0 {
            return Err("webhooks.poll_interval_ms must be > 0".into());
        }
        if let StorageConfig::Postgres { url } = &self.storage
            && url.is_empty()
        {
            return Err("storage.url must not be empty for the postgres backend".into());
        }
        Ok(())
    }

    /// The socket address to bind.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_idp() -> AppConfig {
        let mut config = AppConfig::default();
        config.idp = Some(AuthentikConfig::new(
            url::Url::parse("https://auth.example.com").unwrap(),
            "cid",
            "secret",
            "admin",
        ));
        config
    }

    #[test]
    fn test_defaults_validate_once_idp_is_set() {
        assert!(AppConfig::default().validate().is_err());
        assert!(config_with_idp().validate().is_ok());
    }

    #[test]
    fn test_bad_auth_path_rejected() {
        let mut config = config_with_idp();
        config.server.auth_path = "auth".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_addr() {
        let mut config = config_with_idp();
        config.server.host = "127.0.0.1".into();
        config.server.port = 9000;
        assert_eq!(config.addr().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_storage_backend_parses() {
        let toml = r#"
            backend = "postgres"
            url = "postgres://localhost/catalyst"
        "#;
        let storage: StorageConfig = toml::from_str(toml).unwrap();
        match storage {
            StorageConfig::Postgres { url } => {
                assert_eq!(url, "postgres://localhost/catalyst");
            }
            StorageConfig::Memory => panic!("expected postgres"),
        }
    }
}
