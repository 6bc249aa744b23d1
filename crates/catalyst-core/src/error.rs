//! Gateway error types.
//!
//! Every fallible operation in the workspace returns `CatalystResult<T>`.
//! Errors carry a stable machine-readable code, a human-readable message,
//! and a retryability flag on the infrastructure variants.

use serde_json::Value;

/// Errors that can occur across the Catalyst gateway.
///
/// Variants split along two axes: *domain* errors are caller-visible
/// invariant violations (missing records, duplicate ids, validation
/// failures, incomplete upstream payloads); *infrastructure* errors are
/// transient failures (network, 5xx, timeouts) and carry `retryable`.
#[derive(Debug, thiserror::Error)]
pub enum CatalystError {
    /// The requested record does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was missing.
        message: String,
    },

    /// An insert collided with an existing record id.
    #[error("Duplicate id: {message}")]
    DuplicateId {
        /// Description of the collision.
        message: String,
    },

    /// A key insert collided with an existing key hash.
    #[error("Duplicate hash: {message}")]
    DuplicateHash {
        /// Description of the collision.
        message: String,
    },

    /// The input failed validation before reaching storage.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the violated rule.
        message: String,
        /// Optional structured context (field names, offending values).
        details: Option<Value>,
    },

    /// An upstream identity-provider payload was missing required fields.
    #[error("{code}: {message}")]
    IncompletePayload {
        /// Stable upstream error code (e.g. `TOKEN_RESPONSE_INCOMPLETE`).
        code: &'static str,
        /// Description of the missing fields.
        message: String,
    },

    /// The identity provider call failed.
    #[error("Identity provider error: {message}")]
    IdentityProvider {
        /// Description of the failure.
        message: String,
        /// Whether the call is safe to retry (5xx, 429, timeout).
        retryable: bool,
    },

    /// A store operation failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
        /// Whether the operation is safe to retry.
        retryable: bool,
    },

    /// Policy evaluation failed (not a deny; the engine itself errored).
    #[error("Policy error: {message}")]
    Policy {
        /// Description of the failure.
        message: String,
        /// Whether evaluation is safe to retry.
        retryable: bool,
    },

    /// A cache backend operation failed.
    #[error("Cache error: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// The gateway configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl CatalystError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `DuplicateId` error.
    #[must_use]
    pub fn duplicate_id(message: impl Into<String>) -> Self {
        Self::DuplicateId {
            message: message.into(),
        }
    }

    /// Creates a new `DuplicateHash` error.
    #[must_use]
    pub fn duplicate_hash(message: impl Into<String>) -> Self {
        Self::DuplicateHash {
            message: message.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new `Validation` error with structured details.
    #[must_use]
    pub fn validation_with_details(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Creates a new `IncompletePayload` error with an upstream code.
    #[must_use]
    pub fn incomplete_payload(code: &'static str, message: impl Into<String>) -> Self {
        Self::IncompletePayload {
            code,
            message: message.into(),
        }
    }

    /// Creates a new `IdentityProvider` error.
    #[must_use]
    pub fn identity_provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::IdentityProvider {
            message: message.into(),
            retryable,
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a new retryable `Storage` error.
    #[must_use]
    pub fn storage_retryable(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a new `Policy` error.
    #[must_use]
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a new `Cache` error.
    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::DuplicateHash { .. } => "duplicate_hash",
            Self::Validation { .. } => "validation_error",
            Self::IncompletePayload { code, .. } => code,
            Self::IdentityProvider { .. } => "identity_provider_error",
            Self::Storage { .. } => "storage_error",
            Self::Policy { .. } => "policy_error",
            Self::Cache { .. } => "cache_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Returns `true` if the failed operation is safe to retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IdentityProvider { retryable, .. }
            | Self::Storage { retryable, .. }
            | Self::Policy { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns `true` if this is a domain error (caller-visible invariant
    /// violation rather than a transient failure).
    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::DuplicateId { .. }
                | Self::DuplicateHash { .. }
                | Self::Validation { .. }
                | Self::IncompletePayload { .. }
        )
    }

    /// Returns `true` if this is an infrastructure error.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::IdentityProvider { .. }
                | Self::Storage { .. }
                | Self::Policy { .. }
                | Self::Cache { .. }
                | Self::Internal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalystError::not_found("key key-1");
        assert_eq!(err.to_string(), "Not found: key key-1");

        let err = CatalystError::incomplete_payload(
            "TOKEN_RESPONSE_INCOMPLETE",
            "missing refresh_token",
        );
        assert_eq!(
            err.to_string(),
            "TOKEN_RESPONSE_INCOMPLETE: missing refresh_token"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CatalystError::not_found("x").code(), "not_found");
        assert_eq!(CatalystError::duplicate_hash("x").code(), "duplicate_hash");
        assert_eq!(
            CatalystError::incomplete_payload("AUTHENTIK_PROFILE_INCOMPLETE", "no email").code(),
            "AUTHENTIK_PROFILE_INCOMPLETE"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(CatalystError::identity_provider("502 from upstream", true).is_retryable());
        assert!(!CatalystError::identity_provider("bad payload", false).is_retryable());
        assert!(CatalystError::storage_retryable("pool timeout").is_retryable());
        assert!(!CatalystError::not_found("x").is_retryable());
    }

    #[test]
    fn test_domain_vs_infrastructure() {
        assert!(CatalystError::duplicate_id("x").is_domain());
        assert!(!CatalystError::duplicate_id("x").is_infrastructure());
        assert!(CatalystError::storage("down").is_infrastructure());
        assert!(!CatalystError::storage("down").is_domain());
    }
}
