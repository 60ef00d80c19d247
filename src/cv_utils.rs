use crate::bounding_box::Detection;
use opencv::{
    core::{Mat, Rect, Scalar, Vector},
    imgcodecs, imgproc,
};
use thiserror::Error;

const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Encoder rejected the frame")]
    EncoderRejected,
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

pub struct CvImage {
    pub mat: Mat,
}

impl CvImage {
    pub fn new(mat: Mat) -> Self {
        Self { mat }
    }

    pub fn into_mat(self) -> Mat {
        self.mat
    }

    pub fn to_jpg(&self) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        let encoded = imgcodecs::imencode(".jpg", &self.mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        if !encoded || buf.is_empty() {
            return Err(CvUtilsError::EncoderRejected);
        }
        Ok(buf.into())
    }

    /// Draws a green outline for each box. Pixels off the outline are left untouched.
    pub fn annotate<'a, I>(&mut self, bboxes: I) -> Result<&mut Self, CvUtilsError>
    where
        I: IntoIterator<Item = &'a Detection>,
    {
        let color = Scalar::new(0.0, 255.0, 0.0, 0.0);
        for bbox in bboxes {
            let x1 = bbox.x1 as i32;
            let y1 = bbox.y1 as i32;
            let x2 = bbox.x2 as i32;
            let y2 = bbox.y2 as i32;

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(x1, y1, x2 - x1, y2 - y1),
                color,
                BOX_THICKNESS,
                imgproc::LINE_8,
                0,
            )?;
        }
        Ok(self)
    }
}
