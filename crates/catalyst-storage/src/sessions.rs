//! Session storage trait.
//!
//! The IdP remains the authority on session existence; this store is a
//! local activity cache the gateway touches on every allowed request.

use async_trait::async_trait;

use catalyst_core::{CatalystResult, NewSession, Session, SessionTouch};

/// Storage trait for session activity records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Looks a session up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_session(&self, id: &str) -> CatalystResult<Option<Session>>;

    /// Creates a session record.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if a session with the same id already exists
    /// (the gateway falls back to a touch on this conflict).
    async fn create_session(&self, input: NewSession) -> CatalystResult<Session>;

    /// Updates `last_seen_at` and replaces metadata.
    ///
    /// Callers deep-merge the existing metadata with the new envelope
    /// before touching; the store does a plain replacement.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    async fn touch_session(&self, id: &str, touch: SessionTouch) -> CatalystResult<Session>;

    /// Deletes a session. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_session(&self, id: &str) -> CatalystResult<bool>;
}
