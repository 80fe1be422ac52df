use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Structured API error returned to HTTP clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Failure taxonomy for the dispatch core.
///
/// Nothing here is process-fatal: socket handlers and the event bridge log
/// and drop, and only `NotFound`/`Conflict` on call operations are reported
/// back to the requesting connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Missing or malformed required fields in an inbound event.
    #[error("invalid payload: {0}")]
    Validation(String),
    /// The referenced call, group or user is gone.
    #[error("{0}")]
    NotFound(String),
    /// The user is already busy in another call.
    #[error("{0}")]
    Conflict(String),
    /// An external collaborator call failed.
    #[error("upstream call failed: {0}")]
    Upstream(String),
    /// A pub/sub payload could not be parsed.
    #[error("malformed broker message: {0}")]
    Broker(String),
}

impl DispatchError {
    /// Whether the error carries a message meant for the end user.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Conflict(_))
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(?err, "upstream request error");
        Self::Upstream(err.to_string())
    }
}
