use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::index::IndexStats;
use crate::learning::LearnerStats;
use crate::server::AppState;

use super::{blocking, ApiError};

#[derive(Debug, Serialize)]
pub struct IndexStatsResponse {
    pub index: IndexStats,
    pub learner: LearnerStats,
}

#[derive(Debug, Serialize)]
pub struct SaveIndexResponse {
    pub saved: bool,
    pub entries: usize,
}

pub async fn index_stats(State(state): State<AppState>) -> Json<IndexStatsResponse> {
    Json(IndexStatsResponse {
        index: state.detector.index().stats(),
        learner: state.detector.learner_stats(),
    })
}

pub async fn save_index(
    State(state): State<AppState>,
) -> Result<Json<SaveIndexResponse>, ApiError> {
    let index = state.detector.index().clone();
    let entries = blocking(move || {
        index.save()?;
        Ok(index.len())
    })
    .await?;
    Ok(Json(SaveIndexResponse {
        saved: true,
        entries,
    }))
}
