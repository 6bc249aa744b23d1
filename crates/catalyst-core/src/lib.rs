//! # catalyst-core
//!
//! Core domain types and error model for the Catalyst identity and access
//! gateway.
//!
//! This crate provides:
//! - The persisted record types (profiles, orgs, groups, memberships,
//!   entitlements, sessions, API keys, audit events, webhook subscriptions
//!   and deliveries)
//! - The derived [`EffectiveIdentity`] record consumed by policy evaluation
//! - The label scalar model and its precedence merge
//! - [`CatalystError`], the tagged error type shared by every crate
//!
//! ## Modules
//!
//! - [`error`] - The shared error type and result alias
//! - [`labels`] - Label sets and the precedence merge
//! - [`types`] - Persisted and derived record types
//! - [`json`] - JSON helpers (deep merge)

pub mod error;
pub mod json;
pub mod labels;
pub mod types;

pub use error::CatalystError;
pub use json::deep_merge;
pub use labels::{LabelSet, LabelValue, labels, merge_labels};
pub use types::{
    AuditEvent, AuditFilter, DeliveryResponse, DeliveryStatus, EffectiveIdentity, Entitlement,
    Group, Key, KeyOwner, KeyOwnerKind, KeyStatus, ListKeysOptions, Membership, NewAuditEvent,
    NewDelivery, NewKey, NewSession, NewSubscription, OrgDisplayProfile, OrgProfile, OrgStatus,
    RetryPolicy, RevokeKeyOptions, Session, SessionTouch, SubjectKind, SubscriptionUpdate,
    UserProfile, WebhookDelivery, WebhookEvent, WebhookSubscription, dedupe_scopes,
    hash_key_secret,
};

/// Type alias for gateway results.
pub type CatalystResult<T> = Result<T, CatalystError>;
