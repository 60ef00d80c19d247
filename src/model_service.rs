use crate::bounding_box::Detection;
use crate::cv_utils::CvUtilsError;
use opencv::core::Mat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model file error: {0}")]
    ModelFile(String),
    #[error("ONNX runtime error: {0}")]
    Ort(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Frame preprocessing failed: {0}")]
    Preprocess(#[from] opencv::Error),
    #[error("Cv utils error: {0}")]
    CvUtils(#[from] CvUtilsError),
}

/// A loaded detection model. Given a decoded frame, returns every raw
/// detection it finds, without any class or confidence filtering.
pub trait ModelService: Send + Sync + 'static {
    fn infer(&self, frame: &Mat) -> Result<Vec<Detection>, DetectorError>;
}
