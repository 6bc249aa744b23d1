//! # catalyst-storage
//!
//! Store contracts for the Catalyst gateway and their in-memory
//! implementations.
//!
//! Each entity family gets its own trait:
//!
//! - [`KeyStore`] - API keys (hash/id uniqueness, derived status, usage)
//! - [`SessionStore`] - session activity records
//! - [`ProfileStore`] / [`OrgStore`] / [`GroupStore`] / [`MembershipStore`]
//!   / [`EntitlementStore`] - the directory joins behind effective
//!   identities
//! - [`AuditStore`] - the append-only audit log
//! - [`SubscriptionStore`] / [`DeliveryStore`] - webhook registrations and
//!   the delivery work queue
//!
//! Mutating operations return `CatalystResult`; missing records are values
//! (`Ok(None)`), never errors. PostgreSQL implementations live in
//! `catalyst-storage-postgres`.

pub mod audit;
pub mod directory;
pub mod keys;
pub mod memory;
pub mod sessions;
pub mod webhooks;

pub use audit::AuditStore;
pub use directory::{EntitlementStore, GroupStore, MembershipStore, OrgStore, ProfileStore};
pub use keys::KeyStore;
pub use memory::{
    MemoryAuditLog, MemoryDirectory, MemoryKeyStore, MemorySessionStore, MemoryWebhookStore,
};
pub use sessions::SessionStore;
pub use webhooks::{DeliveryStore, SubscriptionStore};
