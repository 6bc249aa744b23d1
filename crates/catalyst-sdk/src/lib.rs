//! # catalyst-sdk
//!
//! The embedding facade: uniform, validated entry points over the
//! Catalyst stores and ports for callers that link the gateway in-process
//! (admin tools, provisioning jobs, the server binary).
//!
//! Every mutating operation validates its input before it reaches a
//! store, and emits a best-effort audit event after it succeeds.

pub mod facade;
pub mod secrets;

pub use facade::{Catalyst, CatalystStores, IssueKeyRequest, IssuedKey, PublishEventRequest};
pub use secrets::generate_key_secret;
