//! Face descriptor extraction.
//!
//! Every extractor sees the same input gate first: the image must be large
//! enough, the face region must be a usable size, and its brightness and
//! contrast must be within sane bounds. Past the gate, a trained network
//! produces the descriptor when one is loaded; otherwise the luminance grid
//! descriptor is used. The luminance grid is deterministic but carries no
//! biometric strength.

use crate::frame::{self, Frame, Region};
use crate::recognizer::OnnxEmbedder;
use crate::types::{Detection, Embedding, DESCRIPTOR_LEN};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Grid columns × rows of the luminance descriptor.
const GRID_COLS: u32 = 16;
const GRID_ROWS: u32 = 8;
const CLAHE_TILES: u32 = 4;
/// Per-bin histogram clip as a fraction of the tile's pixel count.
const CLAHE_CLIP: f32 = 0.02;
pub const LUMINANCE_MODEL_VERSION: &str = "luminance-grid-v1";

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim descriptor, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Limits applied before any descriptor is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageGate {
    /// Minimum frame width and height.
    pub min_image_size: u32,
    /// Minimum face region width and height.
    pub min_face_size: u32,
    pub min_mean_luminance: f32,
    pub max_mean_luminance: f32,
    /// Below this the face region is too flat to describe.
    pub min_contrast: f32,
}

impl Default for ImageGate {
    fn default() -> Self {
        Self {
            min_image_size: 200,
            min_face_size: 32,
            min_mean_luminance: 20.0,
            max_mean_luminance: 235.0,
            min_contrast: 8.0,
        }
    }
}

impl ImageGate {
    /// Validate the frame and face box, returning the clipped face region.
    pub fn check(&self, frame: &Frame, detection: &Detection) -> Result<Region, EmbeddingError> {
        if frame.width < self.min_image_size || frame.height < self.min_image_size {
            return Err(EmbeddingError::InvalidImage(format!(
                "image {}x{} below minimum {}x{}",
                frame.width, frame.height, self.min_image_size, self.min_image_size
            )));
        }
        let region = Region::from_detection(detection, frame.width, frame.height)
            .ok_or_else(|| EmbeddingError::InvalidImage("face box outside image".into()))?;
        if region.width < self.min_face_size || region.height < self.min_face_size {
            return Err(EmbeddingError::InvalidImage(format!(
                "face region {}x{} too small",
                region.width, region.height
            )));
        }

        let (mean, stddev) = frame::mean_and_stddev(&frame.region_luma(&region));
        if mean < self.min_mean_luminance {
            return Err(EmbeddingError::InvalidImage(format!("face too dark (mean {mean:.1})")));
        }
        if mean > self.max_mean_luminance {
            return Err(EmbeddingError::InvalidImage(format!("face overexposed (mean {mean:.1})")));
        }
        if stddev < self.min_contrast {
            return Err(EmbeddingError::InvalidImage(format!(
                "face contrast too low (stddev {stddev:.1})"
            )));
        }
        Ok(region)
    }
}

/// Produces a descriptor for an already gated face region.
pub trait EmbeddingExtractor {
    fn name(&self) -> &str;

    fn extract(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        region: &Region,
    ) -> Result<Embedding, EmbeddingError>;
}

/// 16×8 grid of mean contrast-equalized luminance over the face region.
#[derive(Debug, Default)]
pub struct LuminanceEmbedder;

impl LuminanceEmbedder {
    pub fn describe(gray: &[u8], width: u32, height: u32) -> Vec<f32> {
        let mut values = Vec::with_capacity(DESCRIPTOR_LEN);
        for row in 0..GRID_ROWS {
            let y0 = row * height / GRID_ROWS;
            let y1 = ((row + 1) * height / GRID_ROWS).max(y0 + 1).min(height);
            for col in 0..GRID_COLS {
                let x0 = col * width / GRID_COLS;
                let x1 = ((col + 1) * width / GRID_COLS).max(x0 + 1).min(width);
                let mut sum = 0u64;
                let mut count = 0u64;
                for y in y0..y1 {
                    for x in x0..x1 {
                        if let Some(&p) = gray.get((y * width + x) as usize) {
                            sum += p as u64;
                            count += 1;
                        }
                    }
                }
                let mean = if count == 0 { 0.0 } else { sum as f32 / count as f32 };
                values.push(mean / 255.0);
            }
        }
        values
    }
}

impl EmbeddingExtractor for LuminanceEmbedder {
    fn name(&self) -> &str {
        LUMINANCE_MODEL_VERSION
    }

    fn extract(
        &mut self,
        frame: &Frame,
        _detection: &Detection,
        region: &Region,
    ) -> Result<Embedding, EmbeddingError> {
        let mut gray = frame.region_luma(region);
        frame::clahe_enhance(&mut gray, region.width, region.height, CLAHE_TILES, CLAHE_CLIP);
        Ok(Embedding {
            values: Self::describe(&gray, region.width, region.height),
            model_version: Some(LUMINANCE_MODEL_VERSION.to_string()),
        })
    }
}

/// Gate, then the trained network if loaded, then the luminance grid.
pub struct EmbeddingPipeline {
    gate: ImageGate,
    model: Option<Box<dyn EmbeddingExtractor>>,
    fallback: LuminanceEmbedder,
}

impl EmbeddingPipeline {
    pub fn new(gate: ImageGate, model: Option<Box<dyn EmbeddingExtractor>>) -> Self {
        Self {
            gate,
            model,
            fallback: LuminanceEmbedder,
        }
    }

    /// Load the network from `model_path` if given. A missing or broken model leaves only the fallback.
    pub fn from_model_path(gate: ImageGate, model_path: Option<&Path>) -> Self {
        let model = model_path.and_then(|path| match OnnxEmbedder::load(path) {
            Ok(embedder) => Some(Box::new(embedder) as Box<dyn EmbeddingExtractor>),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "embedding model unavailable, using luminance descriptor");
                None
            }
        });
        Self::new(gate, model)
    }

    pub fn gate(&self) -> &ImageGate {
        &self.gate
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn extract(&mut self, frame: &Frame, detection: &Detection) -> Result<Embedding, EmbeddingError> {
        let region = self.gate.check(frame, detection)?;

        if let Some(model) = self.model.as_mut() {
            match model.extract(frame, detection, &region) {
                Ok(embedding) if embedding.len() == DESCRIPTOR_LEN => return Ok(embedding),
                Ok(embedding) => {
                    tracing::warn!(
                        extractor = model.name(),
                        len = embedding.len(),
                        "descriptor length mismatch, using luminance descriptor"
                    );
                }
                Err(e) => {
                    tracing::warn!(extractor = model.name(), error = %e, "embedding failed, using luminance descriptor");
                }
            }
        }

        self.fallback.extract(frame, detection, &region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectorKind;

    /// 320×240 frame with a horizontal gradient inside the face box.
    fn face_frame() -> Frame {
        let (w, h) = (320u32, 240u32);
        let gray: Vec<u8> = (0..w * h)
            .map(|i| {
                let x = i % w;
                (40 + (x * 160 / w)) as u8
            })
            .collect();
        Frame::from_gray(&gray, w, h).unwrap()
    }

    fn face_box() -> Detection {
        Detection::new(100.0, 60.0, 120.0, 120.0, 0.9, DetectorKind::Heuristic)
    }

    struct Fixed(Result<Vec<f32>, ()>);

    impl EmbeddingExtractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(&mut self, _: &Frame, _: &Detection, _: &Region) -> Result<Embedding, EmbeddingError> {
            match &self.0 {
                Ok(values) => Ok(Embedding {
                    values: values.clone(),
                    model_version: Some("fixed".into()),
                }),
                Err(()) => Err(EmbeddingError::InferenceFailed("scripted".into())),
            }
        }
    }

    #[test]
    fn test_luminance_descriptor_has_fixed_length() {
        let mut pipeline = EmbeddingPipeline::new(ImageGate::default(), None);
        let emb = pipeline.extract(&face_frame(), &face_box()).unwrap();
        assert_eq!(emb.len(), DESCRIPTOR_LEN);
        assert_eq!(emb.model_version.as_deref(), Some(LUMINANCE_MODEL_VERSION));
        assert!(emb.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_luminance_descriptor_is_deterministic() {
        let mut pipeline = EmbeddingPipeline::new(ImageGate::default(), None);
        let a = pipeline.extract(&face_frame(), &face_box()).unwrap();
        let b = pipeline.extract(&face_frame(), &face_box()).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn test_describe_grid_layout() {
        // Left half dark, right half bright: first 8 columns of each row low.
        let (w, h) = (64u32, 32u32);
        let gray: Vec<u8> = (0..w * h).map(|i| if i % w < 32 { 0 } else { 255 }).collect();
        let values = LuminanceEmbedder::describe(&gray, w, h);
        assert_eq!(values.len(), 128);
        for row in 0..8 {
            for col in 0..16 {
                let v = values[row * 16 + col];
                if col < 8 {
                    assert_eq!(v, 0.0);
                } else {
                    assert_eq!(v, 1.0);
                }
            }
        }
    }

    #[test]
    fn test_clahe_clip_limits_dominant_bin() {
        // Mostly 100 with a sparse bright dot: one bin dominates each tile.
        let (w, h) = (64u32, 64u32);
        let plane: Vec<u8> = (0..w * h).map(|i| if i % 17 == 0 { 200 } else { 100 }).collect();

        let mut clipped = plane.clone();
        frame::clahe_enhance(&mut clipped, w, h, CLAHE_TILES, CLAHE_CLIP);
        let mut unlimited = plane.clone();
        frame::clahe_enhance(&mut unlimited, w, h, CLAHE_TILES, 1.0);

        assert!(CLAHE_CLIP < 1.0);
        assert_ne!(clipped, unlimited);
    }

    #[test]
    fn test_gate_rejects_small_image() {
        let frame = Frame::from_gray(&vec![120u8; 150 * 150], 150, 150).unwrap();
        let det = Detection::new(10.0, 10.0, 100.0, 100.0, 0.9, DetectorKind::Model);
        let err = ImageGate::default().check(&frame, &det).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidImage(_)));
    }

    #[test]
    fn test_gate_rejects_small_face() {
        let det = Detection::new(100.0, 60.0, 20.0, 20.0, 0.9, DetectorKind::Model);
        assert!(ImageGate::default().check(&face_frame(), &det).is_err());
    }

    #[test]
    fn test_gate_rejects_flat_and_extreme_faces() {
        let flat = Frame::from_gray(&vec![120u8; 320 * 240], 320, 240).unwrap();
        assert!(ImageGate::default().check(&flat, &face_box()).is_err());
        let dark = Frame::from_gray(&vec![5u8; 320 * 240], 320, 240).unwrap();
        assert!(ImageGate::default().check(&dark, &face_box()).is_err());
        let bright = Frame::from_gray(&vec![250u8; 320 * 240], 320, 240).unwrap();
        assert!(ImageGate::default().check(&bright, &face_box()).is_err());
    }

    #[test]
    fn test_gate_returns_region() {
        let region = ImageGate::default().check(&face_frame(), &face_box()).unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (100, 60, 120, 120));
    }

    #[test]
    fn test_model_output_preferred() {
        let model = Fixed(Ok(vec![0.5; DESCRIPTOR_LEN]));
        let mut pipeline = EmbeddingPipeline::new(ImageGate::default(), Some(Box::new(model)));
        assert!(pipeline.has_model());
        let emb = pipeline.extract(&face_frame(), &face_box()).unwrap();
        assert_eq!(emb.model_version.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_model_failure_falls_back() {
        let mut pipeline = EmbeddingPipeline::new(ImageGate::default(), Some(Box::new(Fixed(Err(())))));
        let emb = pipeline.extract(&face_frame(), &face_box()).unwrap();
        assert_eq!(emb.model_version.as_deref(), Some(LUMINANCE_MODEL_VERSION));

        let mut pipeline =
            EmbeddingPipeline::new(ImageGate::default(), Some(Box::new(Fixed(Ok(vec![0.1; 10])))));
        let emb = pipeline.extract(&face_frame(), &face_box()).unwrap();
        assert_eq!(emb.len(), DESCRIPTOR_LEN);
        assert_eq!(emb.model_version.as_deref(), Some(LUMINANCE_MODEL_VERSION));
    }

    #[test]
    fn test_missing_model_path_uses_fallback() {
        let pipeline = EmbeddingPipeline::from_model_path(
            ImageGate::default(),
            Some(Path::new("/nonexistent/face_embedding.onnx")),
        );
        assert!(!pipeline.has_model());
    }
}
