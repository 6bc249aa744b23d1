//! Forward-auth request/response shapes and credential extraction.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::headers;

/// The gateway's input shape, as mapped from a proxy-forwarded request.
#[derive(Debug, Clone, Default)]
pub struct ForwardAuthRequest {
    /// HTTP method of the original request.
    pub method: String,
    /// Path of the original request.
    pub path: String,
    /// Request headers; names are lowercased during normalization.
    pub headers: BTreeMap<String, String>,
    /// Explicit org context; overrides the org-hint header.
    pub org_id: Option<String>,
    /// Explicit action; overrides derivation.
    pub action: Option<String>,
    /// Explicit resource; overrides derivation.
    pub resource: Option<String>,
    /// Explicit environment entries; win over derived entries.
    pub environment: Option<Map<String, Value>>,
}

impl ForwardAuthRequest {
    /// Creates a request for `method`/`path` with no headers.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a header; the name is lowercased.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns headers with every name lowercased.
    #[must_use]
    pub fn normalized_headers(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect()
    }
}

/// The gateway's output: a status code and the headers the proxy copies
/// onto the upstream request (allow) or uses to explain the rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardAuthResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers. The body is always empty.
    pub headers: BTreeMap<String, String>,
}

impl ForwardAuthResponse {
    /// An allow response.
    #[must_use]
    pub fn allow(headers: BTreeMap<String, String>) -> Self {
        Self {
            status: 200,
            headers,
        }
    }

    /// A deny or error response carrying `x-forward-auth-error`.
    #[must_use]
    pub fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            headers: BTreeMap::from([(
                headers::FORWARD_AUTH_ERROR.to_string(),
                code.to_string(),
            )]),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// An extracted credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// An opaque API key secret.
    ApiKey(String),
    /// An IdP access token.
    AccessToken(String),
}

/// Extracts the credential from normalized headers.
///
/// Precedence: a non-empty `x-api-key` wins; otherwise the
/// `authorization` header is split on whitespace and dispatched on its
/// scheme (case-insensitive): `bearer` → access token, `key` → API key.
/// A `decision` scheme is cache-only and yields no credential, as does
/// any unknown scheme.
#[must_use]
pub fn extract_credential(headers: &BTreeMap<String, String>) -> Option<Credential> {
    if let Some(api_key) = headers.get(headers::API_KEY) {
        let trimmed = api_key.trim();
        if !trimmed.is_empty() {
            return Some(Credential::ApiKey(trimmed.to_string()));
        }
    }

    let authorization = headers.get(headers::AUTHORIZATION)?;
    let (scheme, rest) = authorization.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    match scheme.to_ascii_lowercase().as_str() {
        "bearer" => Some(Credential::AccessToken(rest.to_string())),
        "key" => Some(Credential::ApiKey(rest.to_string())),
        // `decision` is handled by the cache lookup; a miss means no
        // credential, not a fall-through.
        _ => None,
    }
}

/// The first non-empty element of `x-forwarded-for`, falling back to
/// `x-real-ip`.
#[must_use]
pub fn client_ip(headers: &BTreeMap<String, String>) -> Option<String> {
    if let Some(forwarded_for) = headers.get(headers::FORWARDED_FOR) {
        if let Some(first) = forwarded_for
            .split(',')
            .map(str::trim)
            .find(|part| !part.is_empty())
        {
            return Some(first.to_string());
        }
    }
    headers
        .get(headers::REAL_IP)
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_api_key_header_wins_over_authorization() {
        let headers = headers(&[
            ("x-api-key", "secret"),
            ("authorization", "Bearer token"),
        ]);
        assert_eq!(
            extract_credential(&headers),
            Some(Credential::ApiKey("secret".into()))
        );
    }

    #[test]
    fn test_whitespace_api_key_does_not_match() {
        let headers = headers(&[("x-api-key", "   ")]);
        assert_eq!(extract_credential(&headers), None);
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        let headers = headers(&[("authorization", "BEARER tok")]);
        assert_eq!(
            extract_credential(&headers),
            Some(Credential::AccessToken("tok".into()))
        );
    }

    #[test]
    fn test_key_scheme() {
        let headers = headers(&[("authorization", "Key secret")]);
        assert_eq!(
            extract_credential(&headers),
            Some(Credential::ApiKey("secret".into()))
        );
    }

    #[test]
    fn test_decision_and_unknown_schemes_yield_nothing() {
        assert_eq!(
            extract_credential(&headers(&[("authorization", "Decision tok")])),
            None
        );
        assert_eq!(
            extract_credential(&headers(&[("authorization", "Basic dXNlcg==")])),
            None
        );
    }

    #[test]
    fn test_bearer_with_empty_token_yields_nothing() {
        assert_eq!(
            extract_credential(&headers(&[("authorization", "Bearer   ")])),
            None
        );
        assert_eq!(
            extract_credential(&headers(&[("authorization", "Bearer")])),
            None
        );
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_for() {
        let headers = headers(&[
            ("x-forwarded-for", " , 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "192.168.0.9"),
        ]);
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip() {
        let headers = headers(&[("x-real-ip", "192.168.0.9")]);
        assert_eq!(client_ip(&headers).as_deref(), Some("192.168.0.9"));
    }

    #[test]
    fn test_header_normalization_lowercases_names() {
        let request = ForwardAuthRequest::new("GET", "/x").with_header("X-API-Key", "s");
        assert!(request.headers.contains_key("x-api-key"));
    }
}
