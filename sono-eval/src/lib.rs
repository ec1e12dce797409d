//! sono-eval library - clinical video evaluation service
//!
//! Serves the protocol taxonomy, per-clip diagnostic selections, the
//! teacher attempt ledger and the study-level evaluation reports.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;

pub use error::{ApiError, ApiResult};

use db::{AggregationEngine, AttemptLedger, SelectionRecorder, TaxonomyStore};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub taxonomy: TaxonomyStore,
    pub selections: SelectionRecorder,
    pub ledger: AttemptLedger,
    pub evaluations: AggregationEngine,
}

impl AppState {
    /// Build every repository over the one injected pool
    pub fn new(db: SqlitePool) -> Self {
        Self {
            taxonomy: TaxonomyStore::new(db.clone()),
            selections: SelectionRecorder::new(db.clone()),
            ledger: AttemptLedger::new(db.clone()),
            evaluations: AggregationEngine::new(db.clone()),
            db,
        }
    }
}

/// Build application router
///
/// `/health` needs no caller identity; endpoints that act for a user read
/// it through [`api::CurrentUser`].
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::protocol_routes())
        .merge(api::selection_routes())
        .merge(api::attempt_routes())
        .merge(api::evaluation_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
