// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware layering
// - contact.rs: The public coach-contact endpoint
// - health.rs: Health check and metrics endpoints
// - middleware.rs: Request logging, security headers, metrics auth
//
// ============================================================================

mod contact;
mod health;
mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::MAX_CONTACT_BODY_SIZE;
use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Public contact relay
        .route("/contact/:recipient_id", post(contact::send_contact))
        // Oversized bodies are cut off before any handler runs
        .layer(DefaultBodyLimit::max(MAX_CONTACT_BODY_SIZE))
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                // Tracing layer (outermost - runs first)
                .layer(TraceLayer::new_for_http())
                // Request logging
                .layer(axum::middleware::from_fn(middleware::request_logging))
                // Security headers
                .layer(axum::middleware::from_fn(middleware::add_security_headers))
                .into_inner(),
        )
        // Metrics endpoint protection (needs state, applied separately)
        .layer(axum::middleware::from_fn_with_state(
            app_context.clone(),
            middleware::metrics_auth,
        ))
        .with_state(app_context)
}
