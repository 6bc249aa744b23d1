//! Domain record types.

pub mod audit;
pub mod entitlement;
pub mod group;
pub mod identity;
pub mod key;
pub mod profile;
pub mod session;
pub mod webhook;

pub use audit::{AuditEvent, AuditFilter, NewAuditEvent};
pub use entitlement::{Entitlement, SubjectKind};
pub use group::{Group, Membership};
pub use identity::EffectiveIdentity;
pub use key::{
    Key, KeyOwner, KeyOwnerKind, KeyStatus, ListKeysOptions, NewKey, RevokeKeyOptions,
    dedupe_scopes, hash_key_secret,
};
pub use profile::{OrgDisplayProfile, OrgProfile, OrgStatus, UserProfile};
pub use session::{NewSession, Session, SessionTouch};
pub use webhook::{
    DeliveryResponse, DeliveryStatus, NewDelivery, NewSubscription, RetryPolicy,
    SubscriptionUpdate, WebhookDelivery, WebhookEvent, WebhookSubscription,
};
