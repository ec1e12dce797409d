//! Attempt ledger endpoints
//!
//! Malformed bodies are reported as `INVALID_INPUT` and never reach the
//! ledger.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sono_common::models::{AttemptSummary, EvaluationResponse};

use super::{input_body, path_id, CurrentUser};
use crate::db::{AttemptReceipt, ResponseInput};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAttemptRequest {
    #[serde(alias = "protocolKey")]
    pub protocol_key: String,
    pub responses: Vec<ResponseInput>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertResponseRequest {
    #[serde(alias = "protocolItemId")]
    pub protocol_item_id: i64,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct AttemptList {
    pub attempts: Vec<AttemptSummary>,
}

/// POST /clips/:clip_id/attempts
///
/// The caller is recorded as the scoring teacher.
pub async fn create_attempt(
    State(state): State<AppState>,
    CurrentUser(teacher_id): CurrentUser,
    clip_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CreateAttemptRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AttemptReceipt>)> {
    let clip_id = path_id(clip_id)?;
    let request = input_body(payload)?;

    let receipt = state
        .ledger
        .create_attempt(
            clip_id,
            teacher_id,
            &request.protocol_key,
            request.comment.as_deref(),
            &request.responses,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /clips/:clip_id/attempts
pub async fn list_attempts(
    State(state): State<AppState>,
    clip_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<AttemptList>> {
    let clip_id = path_id(clip_id)?;
    let attempts = state.ledger.list_attempts(clip_id).await?;
    Ok(Json(AttemptList { attempts }))
}

/// POST /attempts/:attempt_id/responses
pub async fn upsert_response(
    State(state): State<AppState>,
    attempt_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpsertResponseRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EvaluationResponse>)> {
    let attempt_id = path_id(attempt_id)?;
    let request = input_body(payload)?;

    let response = state
        .ledger
        .upsert_response(attempt_id, request.protocol_item_id, request.score)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /attempts/:attempt_id/responses
pub async fn list_responses(
    State(state): State<AppState>,
    attempt_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<EvaluationResponse>>> {
    let attempt_id = path_id(attempt_id)?;
    Ok(Json(state.ledger.list_responses(attempt_id).await?))
}

pub fn attempt_routes() -> Router<AppState> {
    Router::new()
        .route("/clips/:clip_id/attempts", get(list_attempts).post(create_attempt))
        .route(
            "/attempts/:attempt_id/responses",
            get(list_responses).post(upsert_response),
        )
}
