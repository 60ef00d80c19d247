use crate::camera::Camera;
use crate::capture::{CaptureLoop, CaptureOutputs};
use crate::config::{Config, ModelConfig};
use crate::detector::HeadDetector;
use crate::model_service::ModelService;
use crate::ort_service::OrtModelService;
use crate::server::{HttpServer, SharedState};
use crate::store::HeadCountStore;
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

fn load_model(config: &ModelConfig) -> Option<Arc<dyn ModelService>> {
    match OrtModelService::new(config) {
        Ok(model) => Some(Arc::new(model)),
        Err(e) => {
            tracing::error!(
                "Detection model could not be loaded, running without detection: {}",
                e
            );
            None
        }
    }
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let store = match HeadCountStore::open(&config.database.path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to initialize database: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Database ready at {:?}", store.path());

    let model_config = config.model.clone();
    let model = tokio::task::spawn_blocking(move || load_model(&model_config)).await?;
    let detector = HeadDetector::from_config(model, &config.model);
    let model_loaded = detector.model_loaded();

    let metrics = Arc::new(Metrics::new()?);
    let outputs = CaptureOutputs::default();

    let (shutdown_tx, _) = broadcast::channel(1);

    let camera_config = config.camera.clone();
    let capture_handle = match tokio::task::spawn_blocking(move || Camera::open(&camera_config))
        .await?
    {
        Ok(camera) => {
            let capture = CaptureLoop::new(
                camera,
                detector,
                store.clone(),
                outputs.clone(),
                (&config.camera.read_retry).into(),
                config.database.get_log_interval(),
                metrics.clone(),
            );
            Some(capture.spawn(shutdown_tx.subscribe()))
        }
        Err(e) => {
            tracing::error!(
                "Could not open camera, video stream will not be available: {}",
                e
            );
            None
        }
    };

    let app_state = SharedState {
        outputs,
        store,
        model_loaded,
        stream_delay_ms: config.camera.get_stream_delay_ms(),
        metrics,
        shutdown: shutdown_tx.clone(),
    };

    let server = HttpServer::new(app_state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());

    if let Some(capture_handle) = capture_handle {
        match capture_handle.await {
            Ok(exit) => tracing::info!("Capture loop exited: {:?}", exit),
            Err(e) => tracing::error!("Capture loop panicked: {}", e),
        }
    }
    if let Ok(Err(e)) = server_handle.await {
        tracing::error!("HTTP server failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
