use crate::{
    bounding_box::Detection,
    config::ModelConfig,
    model_service::{DetectorError, ModelService},
};
use ndarray::{s, Array, Axis, Ix4};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::sync::Mutex;

const INPUT_SIZE: i32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.7;

/// Resizes a BGR frame to the model input and lays it out as NCHW RGB in `[0, 1]`.
fn transform_frame(frame: &Mat) -> Result<(Array<f32, Ix4>, u32, u32), DetectorError> {
    let img_width = frame.cols() as u32;
    let img_height = frame.rows() as u32;

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    if resized.channels() != 3 {
        return Err(DetectorError::Inference(format!(
            "expected a 3 channel frame, got {}",
            resized.channels()
        )));
    }

    let side = INPUT_SIZE as usize;
    let data = resized.data_bytes()?;
    let mut input = Array::zeros((1, 3, side, side));
    for (i, pixel) in data.chunks_exact(3).enumerate() {
        let y = i / side;
        let x = i % side;
        let [b, g, r] = [pixel[0], pixel[1], pixel[2]];
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Decodes a YOLOv8 style `[1, 4 + classes, anchors]` output into frame coordinates.
fn decode_output(
    outputs: &ndarray::ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
) -> Vec<Detection> {
    let mut boxes = Vec::new();
    let outputs = outputs.t();
    let output = outputs.slice(s![.., .., 0]);
    let scale_x = img_width as f32 / INPUT_SIZE as f32;
    let scale_y = img_height as f32 / INPUT_SIZE as f32;

    for row in output.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(Detection {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            class_id: class_id as i64,
            confidence: prob,
        });
    }

    non_max_suppression(boxes)
}

fn non_max_suppression(mut boxes: Vec<Detection>) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        result.push(best);
        boxes.retain(|other| best.iou(other) < NMS_IOU_THRESHOLD);
    }

    result
}

pub struct OrtModelService {
    session: Mutex<Session>,
    min_probability: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        model_config.validate().map_err(DetectorError::ModelFile)?;

        #[cfg(feature = "tensorrt")]
        if let Err(e) = ort::init()
            .with_execution_providers([
                ort::execution_providers::TensorRTExecutionProvider::default()
                    .with_engine_cache(true)
                    .build(),
            ])
            .commit()
        {
            tracing::warn!("TensorRT registration failed, using default providers: {}", e);
        }

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .commit_from_file(model_config.get_path())
            .map_err(ort_error)?;

        tracing::info!("Loaded ONNX model from {:?}", model_config.get_path());

        Ok(Self {
            session: Mutex::new(session),
            min_probability: model_config.min_probability,
        })
    }

    fn run_inference(&self, input: Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        let input_value = Tensor::from_array(input).map_err(ort_error)?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(ort_error)?;
        if outputs.len() == 0 {
            return Err(DetectorError::Inference("model produced no outputs".into()));
        }

        let array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(ort_error)?
            .into_owned();

        Ok(array)
    }
}

fn ort_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Ort(e.to_string())
}

impl ModelService for OrtModelService {
    fn infer(&self, frame: &Mat) -> Result<Vec<Detection>, DetectorError> {
        let (input, img_height, img_width) = transform_frame(frame)?;
        let outputs = self.run_inference(input)?;
        Ok(decode_output(&outputs, img_width, img_height, self.min_probability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_transform_frame() {
        let frame =
            Mat::new_rows_cols_with_default(100, 200, CV_8UC3, Scalar::new(0.0, 0.0, 255.0, 0.0))
                .unwrap();

        let (input, img_height, img_width) = transform_frame(&frame).unwrap();

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 200);
        assert_eq!(img_height, 100);
        assert_eq!(input[[0, 0, 10, 10]], 1.0);
        assert_eq!(input[[0, 2, 10, 10]], 0.0);
    }

    #[test]
    fn test_decode_output_scales_and_filters() {
        // Two anchors, two classes: [1, 6, 2].
        let mut raw = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 6, 2]));
        // anchor 0: centered box, class 0 at 0.9
        raw[[0, 0, 0]] = 320.0;
        raw[[0, 1, 0]] = 320.0;
        raw[[0, 2, 0]] = 64.0;
        raw[[0, 3, 0]] = 64.0;
        raw[[0, 4, 0]] = 0.9;
        raw[[0, 5, 0]] = 0.1;
        // anchor 1: below the pre-filter
        raw[[0, 0, 1]] = 100.0;
        raw[[0, 1, 1]] = 100.0;
        raw[[0, 2, 1]] = 10.0;
        raw[[0, 3, 1]] = 10.0;
        raw[[0, 4, 1]] = 0.05;
        raw[[0, 5, 1]] = 0.1;

        let detections = decode_output(&raw, 1280, 640, 0.25);

        assert_eq!(detections.len(), 1);
        let det = detections[0];
        assert_eq!(det.class_id, 0);
        assert_eq!(det.x1, 640.0 - 64.0);
        assert_eq!(det.x2, 640.0 + 64.0);
        assert_eq!(det.y1, 320.0 - 32.0);
        assert_eq!(det.y2, 320.0 + 32.0);
    }

    #[test]
    fn test_non_max_suppression_keeps_best_overlap() {
        let make = |x1: f32, confidence: f32| Detection {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            class_id: 0,
            confidence,
        };
        let boxes = vec![make(0.0, 0.8), make(1.0, 0.95), make(50.0, 0.7)];

        let kept = non_max_suppression(boxes);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].x1, 50.0);
    }

    #[test]
    fn test_non_max_suppression_terminates_on_zero_area_boxes() {
        let flat = |y1: f32, y2: f32, confidence: f32| Detection {
            x1: 5.0,
            y1,
            x2: 5.0,
            y2,
            class_id: 0,
            confidence,
        };
        let boxes = vec![flat(5.0, 20.0, 0.9), flat(5.0, 20.0, 0.8), flat(30.0, 30.0, 0.75)];

        let kept = non_max_suppression(boxes);

        // zero-area boxes never overlap anything, so each survives once
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
    }
}
