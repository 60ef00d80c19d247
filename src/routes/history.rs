use super::ApiError;
use crate::{server::SharedState, store::DetectionLogEntry};
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use tracing::instrument;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PER_PAGE: u32 = 20;
const INVALID_PAGINATION: &str = "Invalid page or per_page parameter. Must be positive integers.";

/// Raw query values, parsed by hand so bad input maps to our own 400 body.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct Page {
    limit: u32,
    offset: u64,
}

fn parse_positive(value: Option<&str>, default: u32) -> Result<u32, ApiError> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ApiError::BadRequest(INVALID_PAGINATION.into())),
        },
    }
}

impl TryFrom<&HistoryParams> for Page {
    type Error = ApiError;

    fn try_from(params: &HistoryParams) -> Result<Self, Self::Error> {
        let page = parse_positive(params.page.as_deref(), DEFAULT_PAGE)?;
        let per_page = parse_positive(params.per_page.as_deref(), DEFAULT_PER_PAGE)?;
        // SQLite offsets are signed 64-bit
        let offset = (page as u64 - 1)
            .checked_mul(per_page as u64)
            .filter(|&offset| i64::try_from(offset).is_ok())
            .ok_or_else(|| ApiError::BadRequest(INVALID_PAGINATION.into()))?;
        Ok(Page {
            limit: per_page,
            offset,
        })
    }
}

#[instrument(skip(state))]
pub async fn history(
    State(state): State<SharedState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<DetectionLogEntry>>, ApiError> {
    state.metrics.record_request("/history");
    let page = Page::try_from(&params)?;

    let store = state.store.clone();
    let entries =
        tokio::task::spawn_blocking(move || store.get_detection_history(page.limit, page.offset))
            .await??;

    Ok(Json(entries))
}
