//! Read-only live room endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::envelope::ChatEnvelope;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live/{room_id}/viewers", get(viewer_count))
        .route("/live/{room_id}/pinned", get(pinned_message))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ViewerCountResponse {
    pub room_id: String,
    pub viewer_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PinnedMessageResponse {
    /// The room's current pin, shaped like a `pin` chat envelope.
    #[schema(value_type = Option<Object>)]
    pub pinned_message: Option<ChatEnvelope>,
}

// ---------------------------------------------------------------------------
// GET /live/:room_id/viewers
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/live/{room_id}/viewers",
    tag = "Live",
    params(("room_id" = String, Path, description = "Live stream ID")),
    responses(
        (status = 200, description = "Current viewer count", body = ViewerCountResponse),
        (status = 500, description = "Presence store unavailable", body = ApiErrorBody),
    ),
)]
pub async fn viewer_count(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<ViewerCountResponse>, ApiError> {
    let viewer_count = state.presence.viewer_count(&room_id).await?;
    Ok(Json(ViewerCountResponse {
        room_id,
        viewer_count,
    }))
}

// ---------------------------------------------------------------------------
// GET /live/:room_id/pinned
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/live/{room_id}/pinned",
    tag = "Live",
    params(("room_id" = String, Path, description = "Live stream ID")),
    responses(
        (status = 200, description = "Pinned message, or null", body = PinnedMessageResponse),
        (status = 500, description = "Presence store unavailable", body = ApiErrorBody),
    ),
)]
pub async fn pinned_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<PinnedMessageResponse>, ApiError> {
    let pinned_message = state.presence.pinned(&room_id).await?;
    Ok(Json(PinnedMessageResponse { pinned_message }))
}
