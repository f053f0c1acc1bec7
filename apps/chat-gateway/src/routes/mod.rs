pub mod health;
pub mod live;
pub mod presence;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(live::router())
        .merge(presence::router())
        .merge(crate::gateway::server::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Live rooms
        live::viewer_count,
        live::pinned_message,
        // Presence
        presence::user_presence,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            health::HealthResponse,
            live::ViewerCountResponse,
            live::PinnedMessageResponse,
            presence::PresenceResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Live", description = "Live room state"),
        (name = "Presence", description = "User presence"),
    )
)]
pub struct ApiDoc;
