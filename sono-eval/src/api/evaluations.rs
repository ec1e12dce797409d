//! Study evaluation reporting and teacher worklists

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sono_common::models::{EvaluationForm, StudyEvaluation};

use super::{path_id, CurrentUser};
use crate::db::evaluations::Worklist;
use crate::error::ApiResult;
use crate::AppState;

/// POST /studies/:study_id/evaluations
///
/// Opens a pending evaluation of the study by the calling teacher.
pub async fn open_evaluation(
    State(state): State<AppState>,
    CurrentUser(teacher_id): CurrentUser,
    study_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<(StatusCode, Json<EvaluationForm>)> {
    let study_id = path_id(study_id)?;
    let form = state.evaluations.open_evaluation(study_id, teacher_id).await?;
    Ok((StatusCode::CREATED, Json(form)))
}

/// GET /studies/:study_id/evaluation
pub async fn study_evaluation(
    State(state): State<AppState>,
    study_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<StudyEvaluation>> {
    let study_id = path_id(study_id)?;
    Ok(Json(state.evaluations.study_evaluation(study_id).await?))
}

/// GET /evaluations/worklist
pub async fn teacher_worklist(
    State(state): State<AppState>,
    CurrentUser(teacher_id): CurrentUser,
) -> ApiResult<Json<Worklist>> {
    Ok(Json(state.evaluations.teacher_worklist(teacher_id).await?))
}

pub fn evaluation_routes() -> Router<AppState> {
    Router::new()
        .route("/studies/:study_id/evaluations", post(open_evaluation))
        .route("/studies/:study_id/evaluation", get(study_evaluation))
        .route("/evaluations/worklist", get(teacher_worklist))
}
