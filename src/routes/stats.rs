use super::ApiError;
use crate::{server::SharedState, store::RealTimeStats};
use axum::{extract::State, response::Json};
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize)]
pub struct StatsResponse {
    current_detected_heads: u32,
}

#[instrument(skip(state))]
pub async fn stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    state.metrics.record_request("/stats");
    Json(StatsResponse {
        current_detected_heads: state.outputs.count.get(),
    })
}

/// The count as last written to the database, with its timestamp.
#[instrument(skip(state))]
pub async fn persisted_stats(
    State(state): State<SharedState>,
) -> Result<Json<RealTimeStats>, ApiError> {
    state.metrics.record_request("/stats/persisted");
    let store = state.store.clone();
    let stats = tokio::task::spawn_blocking(move || store.get_real_time_stats()).await??;
    Ok(Json(stats))
}
