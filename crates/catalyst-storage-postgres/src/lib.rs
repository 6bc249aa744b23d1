//! PostgreSQL storage backend for Catalyst.
//!
//! Implements the `catalyst-storage` traits over a connection pool:
//!
//! - Keys and webhook deliveries use typed columns (uniqueness indexes,
//!   atomic counters, the conditional delivery claim)
//! - Directory records (profiles, orgs, groups, memberships,
//!   entitlements) use JSONB resource columns with expression lookups
//!
//! Tables are created on demand by [`PostgresCatalystStorage::ensure_schema`].
//!
//! # Example
//!
//! ```ignore
//! use catalyst_storage_postgres::PostgresCatalystStorage;
//!
//! let storage = PostgresCatalystStorage::connect("postgres://localhost/catalyst").await?;
//! storage.ensure_schema().await?;
//! let keys = storage.keys();
//! ```

pub mod audit;
pub mod directory;
pub mod keys;
pub mod schema;
pub mod sessions;
pub mod webhooks;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

use catalyst_core::{CatalystError, CatalystResult};

pub use audit::PostgresAuditLog;
pub use directory::PostgresDirectory;
pub use keys::PostgresKeyStore;
pub use sessions::PostgresSessionStore;
pub use webhooks::PostgresWebhookStore;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

/// Maps a sqlx error to the shared error type. Pool/transport failures
/// are retryable; everything else is not.
pub(crate) fn db_error(error: sqlx_core::Error) -> CatalystError {
    let retryable = matches!(
        error,
        sqlx_core::Error::Io(_)
            | sqlx_core::Error::PoolTimedOut
            | sqlx_core::Error::PoolClosed
            | sqlx_core::Error::WorkerCrashed
    );
    if retryable {
        CatalystError::storage_retryable(format!("database error: {error}"))
    } else {
        CatalystError::storage(format!("database error: {error}"))
    }
}

/// Maps a JSONB decode failure.
pub(crate) fn decode_error(context: &str, error: serde_json::Error) -> CatalystError {
    CatalystError::storage(format!("{context}: corrupt resource column: {error}"))
}

/// PostgreSQL storage backend holding the shared pool.
#[derive(Debug, Clone)]
pub struct PostgresCatalystStorage {
    pool: Arc<PgPool>,
}

impl PostgresCatalystStorage {
    /// Creates storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> CatalystResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Creates the Catalyst tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn ensure_schema(&self) -> CatalystResult<()> {
        schema::ensure_schema(&self.pool).await
    }

    /// A reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Key store operations.
    #[must_use]
    pub fn keys(&self) -> PostgresKeyStore {
        PostgresKeyStore::new(Arc::clone(&self.pool))
    }

    /// Session store operations.
    #[must_use]
    pub fn sessions(&self) -> PostgresSessionStore {
        PostgresSessionStore::new(Arc::clone(&self.pool))
    }

    /// Audit log operations.
    #[must_use]
    pub fn audit(&self) -> PostgresAuditLog {
        PostgresAuditLog::new(Arc::clone(&self.pool))
    }

    /// Webhook subscription and delivery operations.
    #[must_use]
    pub fn webhooks(&self) -> PostgresWebhookStore {
        PostgresWebhookStore::new(Arc::clone(&self.pool))
    }

    /// Directory (profiles, orgs, groups, memberships, entitlements)
    /// operations.
    #[must_use]
    pub fn directory(&self) -> PostgresDirectory {
        PostgresDirectory::new(Arc::clone(&self.pool))
    }
}
