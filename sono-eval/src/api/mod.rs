//! HTTP API handlers for sono-eval

pub mod attempts;
pub mod evaluations;
pub mod health;
pub mod identity;
pub mod protocols;
pub mod selection;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::Path;
use axum::Json;

use crate::error::{ApiError, ApiResult};

pub use attempts::attempt_routes;
pub use evaluations::evaluation_routes;
pub use health::health_routes;
pub use identity::CurrentUser;
pub use protocols::protocol_routes;
pub use selection::selection_routes;

/// Unwrap a JSON body, reporting decode failures as `VALIDATION_ERROR`
pub(crate) fn validated_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

/// Unwrap a JSON body, reporting decode failures as `INVALID_INPUT`
pub(crate) fn input_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))
}

/// Numeric id from the path; anything else is rejected before the store is touched
pub(crate) fn path_id(path: Result<Path<i64>, PathRejection>) -> ApiResult<i64> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))
}
