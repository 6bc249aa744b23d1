//! In-memory store implementations.
//!
//! Backed by `tokio::sync::RwLock` maps. These are complete
//! implementations of the store contracts, used by unit tests and by
//! embedded deployments that do not need durability.

mod audit;
mod directory;
mod keys;
mod sessions;
mod webhooks;

pub use audit::MemoryAuditLog;
pub use directory::MemoryDirectory;
pub use keys::MemoryKeyStore;
pub use sessions::MemorySessionStore;
pub use webhooks::MemoryWebhookStore;
