//! Trained face embedding network via ONNX Runtime.
//!
//! Expects `face_embedding.onnx` taking a 1×3×112×112 RGB tensor and returning
//! a 128-element descriptor, which is L2-normalized before use.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::embedding::{EmbeddingError, EmbeddingExtractor};
use crate::frame::{Frame, Region};
use crate::types::{Detection, Embedding, DESCRIPTOR_LEN};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;
pub const EMBEDDING_MODEL_FILE: &str = "face_embedding.onnx";
const MODEL_VERSION: &str = "face_embedding_128";

pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, EmbeddingError> {
        if !model_path.exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// 112×112 interleaved RGB crop to a normalized NCHW tensor.
    fn preprocess(crop: &[u8]) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
        for y in 0..ALIGNED_SIZE {
            for x in 0..ALIGNED_SIZE {
                let i = (y * ALIGNED_SIZE + x) * 3;
                for c in 0..3 {
                    let v = crop.get(i + c).copied().unwrap_or(0) as f32;
                    tensor[[0, c, y, x]] = (v - INPUT_MEAN) / INPUT_STD;
                }
            }
        }
        tensor
    }
}

/// Scale to unit length; a zero vector is returned unchanged.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

impl EmbeddingExtractor for OnnxEmbedder {
    fn name(&self) -> &str {
        MODEL_VERSION
    }

    fn extract(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        region: &Region,
    ) -> Result<Embedding, EmbeddingError> {
        let crop = detection
            .landmarks
            .as_ref()
            .and_then(|lms| alignment::align_face(frame, lms))
            .unwrap_or_else(|| alignment::crop_face(frame, region));

        let input = Self::preprocess(&crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_LEN {
            return Err(EmbeddingError::DimensionMismatch {
                expected: DESCRIPTOR_LEN,
                actual: raw.len(),
            });
        }

        let mut values = raw.to_vec();
        l2_normalize(&mut values);
        Ok(Embedding {
            values,
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}
