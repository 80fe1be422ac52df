//! Internal trigger endpoint: lets backend services push an event through the
//! bridge without going via the broker.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

#[derive(Debug, Deserialize, ToSchema)]
pub struct InternalEventRequest {
    /// Bridge channel name, e.g. `message.created`.
    #[serde(default)]
    pub channel: Option<String>,
    /// Channel payload, passed to the handler as-is.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InternalEventResponse {
    pub success: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/internal/events", post(emit_event))
}

#[utoipa::path(
    post,
    path = "/internal/events",
    tag = "Internal",
    params(
        ("x-internal-secret" = String, Header, description = "Shared internal secret"),
    ),
    request_body = InternalEventRequest,
    responses(
        (status = 200, description = "Event dispatched to local connections", body = InternalEventResponse),
        (status = 400, description = "Missing channel or data", body = ApiErrorBody),
        (status = 403, description = "Wrong or missing secret", body = ApiErrorBody),
    )
)]
pub async fn emit_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InternalEventResponse>, ApiError> {
    let provided = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secret_matches(provided, &state.config.internal_secret) {
        return Err(ApiError::forbidden("Forbidden"));
    }

    let req: InternalEventRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Missing channel or data"))?;
    let channel = req.channel.filter(|c| !c.is_empty());
    let data = req.data.filter(|d| !d.is_null());
    let (Some(channel), Some(data)) = (channel, data) else {
        return Err(ApiError::bad_request("Missing channel or data"));
    };

    let delivered = state.bridge.dispatch(&channel, &data);
    tracing::info!(%channel, delivered, "internal event dispatched");

    Ok(Json(InternalEventResponse { success: true }))
}

/// Constant-time comparison over SHA-256 digests.
fn secret_matches(provided: &str, expected: &str) -> bool {
    if provided.is_empty() {
        return false;
    }
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
