//! # catalyst-identity
//!
//! Effective-identity composition: joining user profile, organization,
//! membership, groups, and entitlements into the single denormalized
//! [`EffectiveIdentity`] record the policy engine evaluates.

pub mod composer;

pub use composer::{IdentityComposer, IdentityQuery, IdentityResolver};
