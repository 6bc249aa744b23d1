//! Decoders for upstream IdP payloads.
//!
//! Authentik's API spells the same field several ways across endpoints and
//! versions. Each decoder tries an explicit candidate list per field and
//! fails only when every candidate is absent or empty; empty strings count
//! as missing.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use catalyst_core::{CatalystError, CatalystResult};

use crate::types::{IdpGroup, IdpSession, IdpUser, TokenIntrospection, TokenSet};

/// Returns the first candidate field that holds a non-empty string, with
/// numbers stringified (Authentik's `pk` is numeric).
fn first_nonempty(value: &Value, candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        match value.get(candidate) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

/// Decodes a token-endpoint response.
///
/// Requires `access_token`, `refresh_token`, and either `expires_at`
/// (RFC 3339) or `expires_in` (seconds from now).
///
/// # Errors
///
/// Returns `TOKEN_RESPONSE_INCOMPLETE` when a required field is missing.
pub fn decode_token_response(
    value: &Value,
    now: OffsetDateTime,
) -> CatalystResult<TokenSet> {
    let access_token = first_nonempty(value, &["access_token"]).ok_or_else(|| {
        CatalystError::incomplete_payload("TOKEN_RESPONSE_INCOMPLETE", "missing access_token")
    })?;
    let refresh_token = first_nonempty(value, &["refresh_token"]).ok_or_else(|| {
        CatalystError::incomplete_payload("TOKEN_RESPONSE_INCOMPLETE", "missing refresh_token")
    })?;

    let expires_at = match value.get("expires_at").and_then(Value::as_str) {
        Some(raw) => parse_rfc3339(raw),
        None => value
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|seconds| now + time::Duration::seconds(seconds)),
    }
    .ok_or_else(|| {
        CatalystError::incomplete_payload(
            "TOKEN_RESPONSE_INCOMPLETE",
            "missing expires_at/expires_in",
        )
    })?;

    Ok(TokenSet {
        access_token,
        refresh_token,
        expires_at,
        token_type: first_nonempty(value, &["token_type"]),
        scope: first_nonempty(value, &["scope"]),
    })
}

/// Decodes an introspection response.
///
/// `subject` comes from `sub` then `subject`; expiry from the `exp` epoch
/// then an RFC 3339 `expires_at`; every field except `active` and `exp`
/// is kept verbatim in `claims`.
#[must_use]
pub fn decode_introspection(value: &Value) -> TokenIntrospection {
    let active = value.get("active").and_then(Value::as_bool).unwrap_or(false);
    let subject = first_nonempty(value, &["sub", "subject"]);

    let expires_at = match value.get("exp").and_then(Value::as_i64) {
        Some(epoch) => OffsetDateTime::from_unix_timestamp(epoch).ok(),
        None => value
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(parse_rfc3339),
    };

    let claims: Map<String, Value> = value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| key.as_str() != "active" && key.as_str() != "exp")
                .map(|(key, v)| (key.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    TokenIntrospection {
        active,
        subject,
        expires_at,
        claims,
    }
}

/// Decodes a user record.
///
/// # Errors
///
/// Returns `AUTHENTIK_PROFILE_INCOMPLETE` when no id or email candidate
/// is present.
pub fn decode_user(value: &Value) -> CatalystResult<IdpUser> {
    let id = first_nonempty(value, &["uuid", "pk", "id"]).ok_or_else(|| {
        CatalystError::incomplete_payload("AUTHENTIK_PROFILE_INCOMPLETE", "user payload has no id")
    })?;
    let email = first_nonempty(value, &["email", "username", "primary_email"]).ok_or_else(|| {
        CatalystError::incomplete_payload(
            "AUTHENTIK_PROFILE_INCOMPLETE",
            "user payload has no email",
        )
    })?;

    Ok(IdpUser {
        id,
        email,
        name: first_nonempty(value, &["name", "display_name"]),
        attributes: value.get("attributes").cloned(),
    })
}

/// Unwraps `value` or `value.results` into a slice of nodes.
fn result_nodes(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("results") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        _ => vec![value],
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes a sessions response (an array or `{results: [...]}`).
///
/// Nodes without any id candidate are skipped rather than failing the
/// whole listing.
#[must_use]
pub fn decode_sessions(value: &Value) -> Vec<IdpSession> {
    result_nodes(value)
        .into_iter()
        .filter_map(|node| {
            let id = first_nonempty(node, &["uuid", "pk", "identifier", "id"])?;

            let factors = {
                let factors = string_list(node.get("factors"));
                if factors.is_empty() {
                    string_list(node.get("authenticated_methods"))
                } else {
                    factors
                }
            };

            let mut metadata = Map::new();
            if let Some(ip) = first_nonempty(node, &["ip"]) {
                metadata.insert("ip".into(), Value::String(ip));
            }
            if let Some(user_agent) = first_nonempty(node, &["user_agent"]) {
                metadata.insert("userAgent".into(), Value::String(user_agent));
            }
            if let Some(device) = node.get("device").filter(|v| !v.is_null()) {
                metadata.insert("device".into(), device.clone());
            }

            let created_at = node
                .get("created_at")
                .or_else(|| node.get("created"))
                .and_then(Value::as_str)
                .and_then(parse_rfc3339);

            Some(IdpSession {
                id,
                created_at,
                factors,
                metadata: if metadata.is_empty() {
                    None
                } else {
                    Some(Value::Object(metadata))
                },
            })
        })
        .collect()
}

/// Decodes a groups response (array, `{results: [...]}`, or a scalar).
///
/// Collects `name` and `slug` from every node, recursing into nested
/// `group` fields; a bare scalar becomes a name-only group.
#[must_use]
pub fn decode_groups(value: &Value) -> Vec<IdpGroup> {
    let mut groups = Vec::new();
    collect_groups(value, &mut groups);
    groups
}

fn collect_groups(value: &Value, out: &mut Vec<IdpGroup>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_groups(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(results) = map.get("results") {
                collect_groups(results, out);
                return;
            }
            let name = first_nonempty(value, &["name"]);
            let slug = first_nonempty(value, &["slug"]);
            if name.is_some() || slug.is_some() {
                out.push(IdpGroup { name, slug });
            }
            if let Some(nested) = map.get("group") {
                collect_groups(nested, out);
            }
        }
        Value::String(s) if !s.trim().is_empty() => out.push(IdpGroup {
            name: Some(s.clone()),
            slug: None,
        }),
        Value::Number(n) => out.push(IdpGroup {
            name: Some(n.to_string()),
            slug: None,
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc().replace_nanosecond(0).unwrap()
    }

    #[test]
    fn test_token_response_with_expires_in() {
        let at = now();
        let tokens = decode_token_response(
            &json!({"access_token": "at", "refresh_token": "rt", "expires_in": 300}),
            at,
        )
        .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.expires_at, at + time::Duration::seconds(300));
    }

    #[test]
    fn test_token_response_with_expires_at() {
        let tokens = decode_token_response(
            &json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_at": "2026-01-01T00:00:00Z"
            }),
            now(),
        )
        .unwrap();
        assert_eq!(tokens.expires_at.year(), 2026);
    }

    #[test]
    fn test_token_response_incomplete() {
        let err = decode_token_response(&json!({"access_token": "at"}), now()).unwrap_err();
        assert_eq!(err.code(), "TOKEN_RESPONSE_INCOMPLETE");

        let err = decode_token_response(
            &json!({"access_token": "at", "refresh_token": "rt"}),
            now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "TOKEN_RESPONSE_INCOMPLETE");
    }

    #[test]
    fn test_introspection_claims_exclude_active_and_exp() {
        let result = decode_introspection(&json!({
            "active": true,
            "sub": "user-1",
            "exp": 1767225600i64,
            "sid": "session-9",
            "scope": "openid"
        }));
        assert!(result.active);
        assert_eq!(result.subject.as_deref(), Some("user-1"));
        assert!(result.expires_at.is_some());
        assert!(result.claims.contains_key("sid"));
        assert!(result.claims.contains_key("scope"));
        assert!(!result.claims.contains_key("active"));
        assert!(!result.claims.contains_key("exp"));
        assert_eq!(result.session_id(), Some("session-9"));
    }

    #[test]
    fn test_introspection_subject_fallback() {
        let result = decode_introspection(&json!({"active": true, "subject": "u2"}));
        assert_eq!(result.subject.as_deref(), Some("u2"));
    }

    #[test]
    fn test_introspection_missing_active_is_inactive() {
        assert!(!decode_introspection(&json!({"sub": "u"})).active);
    }

    #[test]
    fn test_user_candidate_order() {
        let user = decode_user(&json!({"pk": 42, "uuid": "u-1", "email": "a@b.c"})).unwrap();
        assert_eq!(user.id, "u-1");

        let user = decode_user(&json!({"pk": 42, "username": "bob"})).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.email, "bob");
    }

    #[test]
    fn test_user_empty_string_counts_as_missing() {
        let user = decode_user(&json!({"uuid": "  ", "id": "u-3", "email": "a@b.c"})).unwrap();
        assert_eq!(user.id, "u-3");

        let err = decode_user(&json!({"uuid": "u-1", "email": ""})).unwrap_err();
        assert_eq!(err.code(), "AUTHENTIK_PROFILE_INCOMPLETE");
    }

    #[test]
    fn test_sessions_accept_results_wrapper() {
        let sessions = decode_sessions(&json!({
            "results": [
                {
                    "uuid": "s1",
                    "authenticated_methods": ["password", "totp"],
                    "ip": "1.2.3.4",
                    "user_agent": "curl/8"
                },
                {"no_id": true}
            ]
        }));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(sessions[0].factors, vec!["password", "totp"]);
        let metadata = sessions[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["ip"], "1.2.3.4");
        assert_eq!(metadata["userAgent"], "curl/8");
    }

    #[test]
    fn test_sessions_prefer_factors_over_authenticated_methods() {
        let sessions = decode_sessions(&json!([{
            "pk": 7,
            "factors": ["webauthn"],
            "authenticated_methods": ["password"]
        }]));
        assert_eq!(sessions[0].factors, vec!["webauthn"]);
    }

    #[test]
    fn test_groups_recursion_and_shapes() {
        let groups = decode_groups(&json!({
            "results": [
                {"name": "Admins", "slug": "admins"},
                {"name": "Eng", "group": {"name": "Platform", "slug": "platform"}}
            ]
        }));
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].name.as_deref(), Some("Eng"));
        assert_eq!(groups[2].slug.as_deref(), Some("platform"));

        let scalar = decode_groups(&json!("everyone"));
        assert_eq!(scalar[0].name.as_deref(), Some("everyone"));
    }
}
