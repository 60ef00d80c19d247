use crate::{
    bounding_box::Detection,
    config::ModelConfig,
    cv_utils::CvImage,
    model_service::{DetectorError, ModelService},
};
use opencv::core::Mat;
use std::sync::Arc;

pub const HEAD_CLASS_ID: i64 = 0;
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Counts heads in a frame and outlines each one.
///
/// Only detections of the target class at or above the confidence
/// threshold are counted and drawn. Without a model every frame passes
/// through unchanged with a count of zero.
#[derive(Clone)]
pub struct HeadDetector {
    model: Option<Arc<dyn ModelService>>,
    confidence_threshold: f32,
    target_class: i64,
}

impl HeadDetector {
    pub fn new(model: Option<Arc<dyn ModelService>>) -> Self {
        Self {
            model,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            target_class: HEAD_CLASS_ID,
        }
    }

    pub fn from_config(model: Option<Arc<dyn ModelService>>, config: &ModelConfig) -> Self {
        Self {
            model,
            confidence_threshold: config.confidence_threshold,
            target_class: config.target_class,
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn heads<'a>(
        &'a self,
        detections: &'a [Detection],
    ) -> impl Iterator<Item = &'a Detection> + 'a {
        detections.iter().filter(move |d| {
            d.class_id == self.target_class && d.confidence >= self.confidence_threshold
        })
    }

    pub fn detect(&self, frame: Mat) -> Result<(Mat, u32), DetectorError> {
        let Some(model) = &self.model else {
            return Ok((frame, 0));
        };

        let detections = match model.infer(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!("Inference failed, passing frame through: {}", e);
                return Ok((frame, 0));
            }
        };

        let mut image = CvImage::new(frame);
        let mut count = 0;
        image.annotate(self.heads(&detections).inspect(|_| count += 1))?;

        Ok((image.into_mat(), count))
    }
}
