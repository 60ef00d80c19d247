use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize)]
pub struct StatusResponse {
    service_status: &'static str,
    webcam_status: &'static str,
    model_loaded: bool,
}

fn webcam_status(camera_open: bool, model_loaded: bool) -> &'static str {
    if camera_open {
        "Webcam Ready"
    } else if !model_loaded {
        "Model Not Loaded"
    } else {
        "Webcam Not Ready"
    }
}

#[instrument(skip(state))]
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    state.metrics.record_request("/");
    Json(StatusResponse {
        service_status: "Running",
        webcam_status: webcam_status(state.outputs.status.camera_open(), state.model_loaded),
        model_loaded: state.model_loaded,
    })
}
