//! Protocol taxonomy and scoring template endpoints
//!
//! Reads walk the taxonomy one level at a time; each listing path also takes
//! a POST to author a child on that level.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sono_common::models::{Protocol, ProtocolDetail, ScoringItem, ScoringSection, TaxonomyNode};
use sono_common::TaxonomyLevel;

use super::{path_id, validated_body};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProtocolRequest {
    pub name: String,
}

/// Body for any non-root taxonomy node; `key` defaults to one derived from `name`
#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub key: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSectionRequest {
    pub key: Option<String>,
    pub name: String,
    #[serde(alias = "sortOrder")]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub key: Option<String>,
    pub label: String,
    #[serde(alias = "maxScore")]
    pub max_score: f64,
    #[serde(alias = "scoreScale")]
    pub score_scale: Option<String>,
}

/// GET /protocols
pub async fn list_protocols(State(state): State<AppState>) -> ApiResult<Json<Vec<Protocol>>> {
    Ok(Json(state.taxonomy.list_protocols().await?))
}

/// POST /protocols
pub async fn create_protocol(
    State(state): State<AppState>,
    payload: Result<Json<CreateProtocolRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Protocol>)> {
    let request = validated_body(payload)?;
    let protocol = state.taxonomy.create_protocol(&request.name).await?;
    Ok((StatusCode::CREATED, Json(protocol)))
}

/// GET /protocols/:key
///
/// Protocol with its sections and their items.
pub async fn get_protocol(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ProtocolDetail>> {
    Ok(Json(state.taxonomy.get_protocol(&key).await?))
}

/// GET /protocols/:key/windows
pub async fn list_windows(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Vec<TaxonomyNode>>> {
    Ok(Json(state.taxonomy.list_windows(&key).await?))
}

/// POST /protocols/:key/windows
pub async fn create_window(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<CreateNodeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TaxonomyNode>)> {
    let request = validated_body(payload)?;
    let window = state
        .taxonomy
        .create_window(&key, request.key.as_deref(), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(window)))
}

/// POST /protocols/:key/sections
pub async fn create_section(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<CreateSectionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScoringSection>)> {
    let request = validated_body(payload)?;
    let section = state
        .taxonomy
        .create_section(&key, request.key.as_deref(), &request.name, request.sort_order)
        .await?;
    Ok((StatusCode::CREATED, Json(section)))
}

/// POST /sections/:id/items
pub async fn create_item(
    State(state): State<AppState>,
    section_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CreateItemRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScoringItem>)> {
    let section_id = path_id(section_id)?;
    let request = validated_body(payload)?;
    let item = state
        .taxonomy
        .create_item(
            section_id,
            request.key.as_deref(),
            &request.label,
            request.max_score,
            request.score_scale.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn list_level(
    state: AppState,
    level: TaxonomyLevel,
    parent: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<TaxonomyNode>>> {
    let parent_id = path_id(parent)?;
    Ok(Json(state.taxonomy.list_children(level, parent_id).await?))
}

async fn create_level(
    state: AppState,
    level: TaxonomyLevel,
    parent: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CreateNodeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TaxonomyNode>)> {
    let parent_id = path_id(parent)?;
    let request = validated_body(payload)?;
    let node = state
        .taxonomy
        .create_node(level, parent_id, request.key.as_deref(), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// GET lists children of `:id` on `level`, POST creates one
fn node_routes(path: &str, level: TaxonomyLevel) -> Router<AppState> {
    Router::new().route(
        path,
        get(
            move |State(state): State<AppState>, parent: Result<Path<i64>, PathRejection>| {
                list_level(state, level, parent)
            },
        )
        .post(
            move |State(state): State<AppState>,
                  parent: Result<Path<i64>, PathRejection>,
                  payload: Result<Json<CreateNodeRequest>, JsonRejection>| {
                create_level(state, level, parent, payload)
            },
        ),
    )
}

pub fn protocol_routes() -> Router<AppState> {
    Router::new()
        .route("/protocols", get(list_protocols).post(create_protocol))
        .route("/protocols/:key", get(get_protocol))
        .route("/protocols/:key/windows", get(list_windows).post(create_window))
        .route("/protocols/:key/sections", post(create_section))
        .route("/sections/:id/items", post(create_item))
        .merge(node_routes("/windows/:id/findings", TaxonomyLevel::Finding))
        .merge(node_routes("/findings/:id/diagnoses", TaxonomyLevel::PossibleDiagnosis))
        .merge(node_routes("/diagnoses/:id/subdiagnoses", TaxonomyLevel::Subdiagnosis))
        .merge(node_routes(
            "/subdiagnoses/:id/sub-subdiagnoses",
            TaxonomyLevel::SubSubdiagnosis,
        ))
        .merge(node_routes(
            "/sub-subdiagnoses/:id/third-order",
            TaxonomyLevel::ThirdOrderDiagnosis,
        ))
}
