//! Per-clip diagnostic selection of the calling user

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sono_common::models::{Selection, SelectionPath};

use super::{input_body, path_id, CurrentUser};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveSelectionRequest {
    pub path: SelectionPath,
}

/// POST /protocols/video/:clip_id/selection
///
/// Replaces any earlier selection of this user for the clip.
pub async fn save_selection(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    clip_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SaveSelectionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Selection>)> {
    let clip_id = path_id(clip_id)?;
    let request = input_body(payload)?;
    let selection = state
        .selections
        .save_selection(clip_id, user_id, &request.path)
        .await?;
    Ok((StatusCode::CREATED, Json(selection)))
}

/// GET /protocols/video/:clip_id/selection
pub async fn get_selection(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    clip_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Selection>> {
    let clip_id = path_id(clip_id)?;
    Ok(Json(state.selections.get_selection(clip_id, user_id).await?))
}

pub fn selection_routes() -> Router<AppState> {
    Router::new().route(
        "/protocols/video/:clip_id/selection",
        get(get_selection).post(save_selection),
    )
}
