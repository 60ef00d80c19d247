use crate::{
    server::SharedState,
    stream::{VideoStream, VideoStreamError, FRAME_BOUNDARY},
};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    state.metrics.record_request("/video_feed");
    if !state.model_loaded || !state.outputs.status.camera_open() {
        return Err(VideoStreamError::Unavailable(
            "Model or Video Capture not ready.".into(),
        ));
    }

    let stream = VideoStream::new(
        state.outputs.frames.clone(),
        state.stream_delay_ms,
        state.shutdown.clone(),
    )
    .generate_stream();

    let body = Body::from_stream(stream);

    let response = Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| VideoStreamError::HttpBuilderError(e.to_string()))?;

    Ok(response)
}

impl IntoResponse for VideoStreamError {
    fn into_response(self) -> Response {
        let status = match self {
            VideoStreamError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            VideoStreamError::Frame(_)
            | VideoStreamError::Encode(_)
            | VideoStreamError::HttpBuilderError(_)
            | VideoStreamError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
