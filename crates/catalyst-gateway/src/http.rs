//! Axum surface: the forward-auth endpoint and the health endpoint.
//!
//! The handler maps a proxy-forwarded HTTP request onto the service's
//! input shape (honoring `x-forwarded-method`/`x-forwarded-uri`) and
//! renders the service's output as response headers with an empty body.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use http_body_util::Full;
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::headers;
use crate::request::ForwardAuthRequest;
use crate::service::ForwardAuthService;

/// Shared state behind the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    /// The forward-auth service.
    pub service: Arc<ForwardAuthService>,
}

/// Builds the gateway router: the auth endpoint on `auth_path` (any
/// method), `/healthz`, and a panic catcher that turns handler panics
/// into `500 {"error":"internal_error"}`.
#[must_use]
pub fn router(state: GatewayState, auth_path: &str) -> Router {
    Router::new()
        .route(auth_path, any(forward_auth_handler))
        .route("/healthz", get(healthz_handler))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn handle_panic(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response<Full<Bytes>> {
    tracing::error!("panic reached the forward-auth HTTP edge");
    let mut response = Response::new(Full::new(Bytes::from_static(
        br#"{"error":"internal_error"}"#,
    )));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn forward_auth_handler(
    State(state): State<GatewayState>,
    request: Request,
) -> impl IntoResponse {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    // The proxy's original method/path win over the hook request's own.
    let method = header_map
        .get(headers::FORWARDED_METHOD)
        .cloned()
        .unwrap_or_else(|| request.method().as_str().to_string());
    let path = header_map
        .get(headers::FORWARDED_URI)
        .cloned()
        .unwrap_or_else(|| request.uri().path().to_string());

    let input = ForwardAuthRequest {
        method,
        path,
        headers: header_map,
        org_id: None,
        action: None,
        resource: None,
        environment: None,
    };

    let output = state.service.handle(&input).await;

    let mut response = Response::new(Body::empty());
    *response.status_mut() =
        StatusCode::from_u16(output.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in &output.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => {
                tracing::warn!(header = %name, "dropping unrepresentable response header");
            }
        }
    }
    response
}

#[derive(Debug, Serialize)]
struct CacheHealth {
    name: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    caches: Vec<CacheHealth>,
}

async fn healthz_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let mut caches = Vec::new();
    if let Some(cache) = state.service.cache() {
        let (healthy, error) = match cache.probe().await {
            Ok(()) => (true, None),
            Err(probe_error) => (false, Some(probe_error.to_string())),
        };
        caches.push(CacheHealth {
            name: cache.name().to_string(),
            healthy,
            error,
        });
    }

    let ok = caches.iter().all(|c| c.healthy);
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(HealthResponse { ok, caches }))
}
