// ============================================================================
// Contact Routes
// ============================================================================
//
// Endpoints:
// - POST /contact/:recipient_id - Relay an anonymous message to a coach
//
// ============================================================================

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::dispatch::dispatch_contact;
use crate::utils::extract_client_ip;
use crate::validate::RawContactInput;
use relay_error::AppError;

/// POST /contact/:recipient_id
/// Relays a visitor's message to a coach without exposing the coach's
/// address. The recipient id path segment is handed to the pipeline
/// verbatim; nothing about the request is persisted here.
pub async fn send_contact(
    State(app_context): State<Arc<AppContext>>,
    Path(recipient_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<RawContactInput>,
) -> Result<impl IntoResponse, AppError> {
    // The sender identity is the forwarded client address; behind a broken
    // proxy this degrades to one shared "unknown" bucket rather than an
    // unlimited one
    let client_key = extract_client_ip(&headers, None);

    let receipt = dispatch_contact(&app_context, &client_key, &recipient_id, payload).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Your message has been sent.",
            "data": {
                "recipientName": receipt.recipient_name,
                "timestamp": receipt.timestamp.to_rfc3339(),
            }
        })),
    ))
}
