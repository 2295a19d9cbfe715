//! Middleware and request helpers

use axum::{
    Json,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::AuthError;
use crate::config::CorsConfig;

/// Error body returned for rejected HTTP requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// 401 response for a failed handshake
#[must_use]
pub fn unauthorized(err: &AuthError) -> Response {
    let body = Json(ErrorResponse {
        error: err.code().to_string(),
        message: err.to_string(),
    });
    (StatusCode::UNAUTHORIZED, body).into_response()
}

/// Token from `Authorization: Bearer ...`
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = get_client_ip(request.headers());

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis(),
        client_ip = %client_ip,
        "Request processed"
    );

    response
}

/// CORS layer factory
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(config.max_age_seconds));

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    cors
}

/// Extract client IP from proxy headers
fn get_client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded_for) = headers.get("X-Forwarded-For")
        && let Ok(forwarded_str) = forwarded_for.to_str()
        && let Some(first_ip) = forwarded_str.split(',').next()
    {
        return first_ip.trim().to_string();
    }

    if let Some(real_ip) = headers.get("X-Real-IP")
        && let Ok(real_ip_str) = real_ip.to_str()
    {
        return real_ip_str.to_string();
    }

    "unknown".to_string()
}
