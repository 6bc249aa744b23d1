//! # catalyst-webhooks
//!
//! Webhook fan-out and delivery for Catalyst.
//!
//! The [`WebhookDispatcher`] turns a domain event into one pending
//! delivery row per matching subscription; the [`DeliveryWorker`] polls
//! those rows, executes HMAC-signed HTTPS POSTs, and drives each row to
//! `succeeded` or `dead_lettered` through the retry state machine.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::WebhookDispatcher;
pub use worker::{DeliveryWorker, RunSummary, WorkerConfig, sign_payload};
