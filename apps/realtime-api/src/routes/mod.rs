pub mod health;
pub mod internal;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(internal::router())
        .merge(crate::gateway::server::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        internal::emit_event,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            health::HealthResponse,
            internal::InternalEventRequest,
            internal::InternalEventResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Internal", description = "Backend-to-realtime event trigger"),
    )
)]
pub struct ApiDoc;
