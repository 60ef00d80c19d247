mod history;
mod metrics;
mod stats;
mod status;
mod video_feed;

use crate::{server::SharedState, store::StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use thiserror::Error;

pub use history::history;
pub use metrics::metrics_handler;
pub use stats::{persisted_stats, stats};
pub use status::status;
pub use video_feed::video_feed;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(status))
        .route("/video_feed", get(video_feed))
        .route("/stats", get(stats))
        .route("/stats/persisted", get(persisted_stats))
        .route("/history", get(history))
        .route("/metrics", get(metrics_handler))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Metrics encoding failed: {0}")]
    Metrics(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Task(_) | ApiError::Metrics(_) => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
