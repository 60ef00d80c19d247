use crate::config::{CameraBackend, CameraConfig};
use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera {index} could not be opened with backend {backend:?}")]
    NotOpened { index: i32, backend: CameraBackend },
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

impl CameraBackend {
    pub fn api_preference(self) -> i32 {
        match self {
            CameraBackend::Any => videoio::CAP_ANY,
            CameraBackend::Dshow => videoio::CAP_DSHOW,
            CameraBackend::V4l2 => videoio::CAP_V4L2,
            CameraBackend::Msmf => videoio::CAP_MSMF,
            CameraBackend::Avfoundation => videoio::CAP_AVFOUNDATION,
            CameraBackend::Gstreamer => videoio::CAP_GSTREAMER,
        }
    }
}

/// Something that yields frames one at a time.
///
/// `Ok(None)` means the device is open but had no frame to give.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Mat>, CameraError>;
    fn is_opened(&self) -> bool;
    fn release(&mut self);
}

pub struct Camera {
    capture: videoio::VideoCapture,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        tracing::info!(
            "Opening camera at index {} using {:?} backend",
            config.index,
            config.backend
        );
        let capture = videoio::VideoCapture::new(config.index, config.backend.api_preference())
            .map_err(CameraError::OpenCameraFailed)?;

        if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
            return Err(CameraError::NotOpened {
                index: config.index,
                backend: config.backend,
            });
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or_default();
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or_default();
        tracing::info!(
            "Camera at index {} opened, capture resolution {}x{}",
            config.index,
            width as i64,
            height as i64
        );

        Ok(Self { capture })
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Option<Mat>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn is_opened(&self) -> bool {
        self.capture.is_opened().unwrap_or(false)
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {}", e);
        }
    }
}
