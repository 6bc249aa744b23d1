//! Catalyst gateway server.
//!
//! Wires the forward-auth pipeline, the webhook delivery worker, and the
//! configured stores behind one axum listener.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use catalyst_cache::{DecisionCache, MemoryDecisionCache};
use catalyst_gateway::{ForwardAuthService, GatewayState, router};
use catalyst_idp::{AuthentikClient, IdentityProvider};
use catalyst_policy::{PolicyEngine, RuleEvaluator};
use catalyst_sdk::{Catalyst, CatalystStores};
use catalyst_storage_postgres::PostgresCatalystStorage;
use catalyst_webhooks::DeliveryWorker;

use crate::config::{AppConfig, StorageConfig};

#[derive(Debug, Parser)]
#[command(name = "catalyst-server", about = "Catalyst identity and access gateway")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "CATALYST_CONFIG", default_value = "catalyst.toml")]
    config: String,
}

fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::with_name(path).required(false))
        .add_source(::config::Environment::with_prefix("CATALYST").separator("__"))
        .build()
        .context("building configuration")?;
    settings
        .try_deserialize()
        .context("deserializing configuration")
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_stores(storage: &StorageConfig) -> anyhow::Result<CatalystStores> {
    match storage {
        StorageConfig::Memory => {
            tracing::warn!("using in-memory stores; state will not survive a restart");
            Ok(CatalystStores::in_memory())
        }
        StorageConfig::Postgres { url } => {
            let postgres = PostgresCatalystStorage::connect(url)
                .await
                .context("connecting to postgres")?;
            postgres
                .ensure_schema()
                .await
                .context("ensuring postgres schema")?;
            Ok(CatalystStores {
                keys: Arc::new(postgres.keys()),
                sessions: Arc::new(postgres.sessions()),
                profiles: Arc::new(postgres.directory()),
                orgs: Arc::new(postgres.directory()),
                groups: Arc::new(postgres.directory()),
                memberships: Arc::new(postgres.directory()),
                entitlements: Arc::new(postgres.directory()),
                audit: Arc::new(postgres.audit()),
                subscriptions: Arc::new(postgres.webhooks()),
                deliveries: Arc::new(postgres.webhooks()),
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

async fn run(app_config: AppConfig) -> anyhow::Result<()> {
    let idp_config = app_config
        .idp
        .clone()
        .context("idp configuration is required")?;
    let idp: Arc<dyn IdentityProvider> = Arc::new(AuthentikClient::new(idp_config));

    let stores = build_stores(&app_config.storage).await?;
    let catalyst = Catalyst::new(stores.clone());

    let policy: Arc<dyn PolicyEngine> = {
        let mut evaluator = RuleEvaluator::new(
            app_config.policy.rules.clone(),
            app_config.policy.default_decision,
        );
        if app_config.policy.mint_decision_tokens {
            evaluator = evaluator.with_decision_tokens();
        }
        Arc::new(evaluator)
    };
    let cache: Arc<dyn DecisionCache> = Arc::new(MemoryDecisionCache::new());

    let service = ForwardAuthService::new(
        app_config.gateway.clone(),
        idp,
        catalyst.resolver(),
        policy,
    )
    .with_cache(cache)
    .with_key_store(stores.keys.clone())
    .with_session_store(stores.sessions.clone())
    .with_audit_store(stores.audit.clone());

    let app = router(
        GatewayState {
            service: Arc::new(service),
        },
        &app_config.server.auth_path,
    );

    if app_config.webhooks.enabled {
        let worker = DeliveryWorker::new(
            stores.subscriptions.clone(),
            stores.deliveries.clone(),
            app_config.webhooks.worker.clone(),
        );
        let poll_interval = app_config.webhooks.poll_interval();
        tokio::spawn(async move {
            worker.run(poll_interval).await;
        });
    }

    let addr = app_config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, auth_path = %app_config.server.auth_path, "catalyst server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let app_config = load_config(&cli.config)?;
    app_config
        .validate()
        .map_err(|message| anyhow::anyhow!("invalid configuration: {message}"))?;
    init_tracing(&app_config.logging.level);

    run(app_config).await
}
