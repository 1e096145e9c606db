// ============================================================================
// Axum Middleware
// ============================================================================
//
// Middleware for request processing:
// - request_logging: Log all incoming requests
// - add_security_headers: Add security headers to responses
// - metrics_auth: Bearer-token protection for the /metrics endpoint
//
// ============================================================================

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;

use crate::context::AppContext;
use crate::utils::extract_client_ip;
use relay_error::AppError;

/// Request logging middleware
pub async fn request_logging(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    tracing::debug!(
        method = %method,
        path = %path,
        "Incoming request"
    );

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

/// Add security headers to responses
///
/// Protects against clickjacking (X-Frame-Options), MIME sniffing
/// (X-Content-Type-Options), injected scripts (Content-Security-Policy) and
/// referrer leakage. HSTS is added only when the request arrived over HTTPS.
pub async fn add_security_headers(req: Request, next: Next) -> Response {
    // Extract HTTPS status before moving req
    let is_https = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "https")
        .unwrap_or(false);

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    // REST-only surface: no HTML is served, so a restrictive CSP is free
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'self'; script-src 'none'; object-src 'none';"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    if is_https {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}

/// Metrics Authentication Middleware
///
/// Protects the /metrics endpoint with a Bearer token when enabled.
/// The comparison is constant-time to prevent timing attacks.
pub async fn metrics_auth(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Skip if metrics auth is disabled
    if !ctx.config.security.metrics_auth_enabled {
        return Ok(next.run(req).await);
    }

    // Only apply to /metrics endpoint
    if req.uri().path() != "/metrics" {
        return Ok(next.run(req).await);
    }

    let headers = req.headers();

    if let Some(expected_token) = &ctx.config.security.metrics_bearer_token
        && let Some(auth_header) = headers.get("authorization").and_then(|v| v.to_str().ok())
        && let Some(token) = auth_header.strip_prefix("Bearer ")
        && bool::from(token.as_bytes().ct_eq(expected_token.as_bytes()))
    {
        return Ok(next.run(req).await);
    }

    tracing::warn!(
        ip = %extract_client_ip(headers, None),
        "Unauthorized metrics access attempt"
    );

    Err(AppError::auth(
        "Unauthorized: Metrics endpoint requires authentication",
    ))
}
