//! Header names on the forward-auth surface.

/// Decision-token header; short-circuits to the cache.
pub const DECISION_JWT: &str = "x-decision-jwt";
/// Opaque API key secret.
pub const API_KEY: &str = "x-api-key";
/// Bearer/key scheme credentials.
pub const AUTHORIZATION: &str = "authorization";

/// Allow-path identity headers.
pub const USER_SUB: &str = "x-user-sub";
pub const ORG_ID: &str = "x-org-id";
pub const SESSION_ID: &str = "x-session-id";
pub const USER_GROUPS: &str = "x-user-groups";
pub const USER_ROLES: &str = "x-user-roles";
pub const USER_ENTITLEMENTS: &str = "x-user-entitlements";
pub const USER_SCOPES: &str = "x-user-scopes";
pub const USER_LABELS: &str = "x-user-labels";
pub const FORWARD_AUTH_REASON: &str = "x-forward-auth-reason";
pub const POLICY_OBLIGATIONS: &str = "x-policy-obligations";

/// Deny/error headers.
pub const FORWARD_AUTH_ERROR: &str = "x-forward-auth-error";
pub const FORWARD_AUTH_ERROR_MESSAGE: &str = "x-forward-auth-error-message";

/// Proxy-forwarded request context.
pub const FORWARDED_METHOD: &str = "x-forwarded-method";
pub const FORWARDED_URI: &str = "x-forwarded-uri";
pub const FORWARDED_HOST: &str = "x-forwarded-host";
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const FORWARDED_PORT: &str = "x-forwarded-port";
pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const REAL_IP: &str = "x-real-ip";
pub const USER_AGENT: &str = "user-agent";
