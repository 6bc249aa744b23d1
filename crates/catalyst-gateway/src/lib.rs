//! # catalyst-gateway
//!
//! The forward-auth decision pipeline and its HTTP surface.
//!
//! A reverse proxy calls the gateway before serving each request; the
//! gateway answers with a status code and identity headers. The hot loop
//! collapses to a single cache lookup when the request carries a decision
//! token from a previous allow.
//!
//! ## Modules
//!
//! - [`config`] - TTLs, cache prefix, header names
//! - [`headers`] - The forward-auth header vocabulary
//! - [`request`] - Request/response shapes and credential extraction
//! - [`service`] - The decision pipeline
//! - [`http`] - Axum handlers and the health endpoint

pub mod config;
pub mod headers;
pub mod http;
pub mod request;
pub mod service;

pub use config::GatewayConfig;
pub use http::{GatewayState, router};
pub use request::{Credential, ForwardAuthRequest, ForwardAuthResponse, extract_credential};
pub use service::ForwardAuthService;
