//! Native SeetaFace cascade detector via the `rustface` crate.

use super::{DetectorError, FaceDetect};
use crate::frame::Frame;
use crate::types::{Detection, DetectorKind};
use std::path::Path;

const SEETA_MIN_FACE_SIZE: u32 = 40;
const SEETA_SCORE_THRESHOLD: f64 = 2.0;
const SEETA_PYRAMID_SCALE: f32 = 0.8;
const SEETA_WINDOW_STEP: u32 = 4;
/// Cascade score that maps to confidence 0.5.
const SEETA_SCORE_HALF: f64 = 5.0;

/// Frontal-face cascade loaded from `seeta_fd_frontal_v1.0.bin`.
pub struct SeetaFaceDetector {
    detector: Box<dyn rustface::Detector>,
}

impl SeetaFaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        let path = model_path
            .to_str()
            .ok_or_else(|| DetectorError::Unavailable(format!("non-UTF-8 model path: {}", model_path.display())))?;

        let mut detector = rustface::create_detector(path)?;
        detector.set_min_face_size(SEETA_MIN_FACE_SIZE);
        detector.set_score_thresh(SEETA_SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(SEETA_PYRAMID_SCALE);
        detector.set_slide_window_step(SEETA_WINDOW_STEP, SEETA_WINDOW_STEP);

        tracing::info!(path = %model_path.display(), "loaded SeetaFace cascade");
        Ok(Self { detector })
    }
}

impl FaceDetect for SeetaFaceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Native
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let gray = frame.to_luma();
        let image = rustface::ImageData::new(&gray, frame.width, frame.height);

        Ok(self
            .detector
            .detect(&image)
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Detection::new(
                    bbox.x() as f32,
                    bbox.y() as f32,
                    bbox.width() as f32,
                    bbox.height() as f32,
                    seeta_confidence(face.score()),
                    DetectorKind::Native,
                )
            })
            .collect())
    }
}

/// Map an unbounded cascade score onto [0, 1).
fn seeta_confidence(score: f64) -> f32 {
    if score <= 0.0 {
        return 0.0;
    }
    (score / (score + SEETA_SCORE_HALF)) as f32
}
