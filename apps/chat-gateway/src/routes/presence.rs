use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/presence/{user_id}", get(user_presence))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub user_id: String,
    pub online: bool,
    /// Unset if the user hasn't connected within the presence TTL.
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/presence/{user_id}",
    tag = "Presence",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Online state and last seen time", body = PresenceResponse),
        (status = 500, description = "Presence store unavailable", body = ApiErrorBody),
    ),
)]
pub async fn user_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let record = state.presence.status(&user_id).await?;
    Ok(Json(PresenceResponse {
        user_id,
        online: record.as_ref().is_some_and(|r| r.online),
        last_seen_at: record.map(|r| r.last_seen_at),
    }))
}
