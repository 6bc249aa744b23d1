//! # catalyst-idp
//!
//! Authentik identity-provider adapter for the Catalyst gateway.
//!
//! This crate provides:
//! - The [`IdentityProvider`] port (token validation, token exchange and
//!   refresh, user/session/group reads)
//! - [`AuthentikClient`], the HTTP implementation
//! - Duck-typed decoders that tolerate the several spellings Authentik
//!   uses for the same field across endpoints
//!
//! ## Modules
//!
//! - [`config`] - Endpoint paths, credentials, and timeouts
//! - [`client`] - The port trait and HTTP client
//! - [`decode`] - Candidate-list payload decoders
//! - [`types`] - Internal shapes produced by the adapter

pub mod client;
pub mod config;
pub mod decode;
pub mod types;

pub use client::{AuthentikClient, IdentityProvider};
pub use config::AuthentikConfig;
pub use types::{IdpGroup, IdpSession, IdpUser, TokenIntrospection, TokenSet};
