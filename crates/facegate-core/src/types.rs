use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of every face descriptor stored in a [`FaceTemplate`].
pub const DESCRIPTOR_LEN: usize = 128;

/// Five canonical facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

pub const LEFT_EYE: usize = 0;
pub const RIGHT_EYE: usize = 1;
pub const NOSE: usize = 2;
pub const LEFT_MOUTH: usize = 3;
pub const RIGHT_MOUTH: usize = 4;

/// Which detector tier produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Native,
    Model,
    Heuristic,
    Centered,
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Model => "model",
            Self::Heuristic => "heuristic",
            Self::Centered => "centered",
        })
    }
}

/// A candidate face location in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
    pub source: DetectorKind,
}

impl Detection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32, source: DetectorKind) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
            source,
        }
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Finite coordinates and a strictly positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height, self.confidence]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// Face descriptor vector produced by an embedding extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Extractor that produced this descriptor (e.g., "luminance-grid", "face_embedding").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An enrolled descriptor tied to an identity. Replaced wholesale, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceTemplate {
    pub descriptor: Vec<f32>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl FaceTemplate {
    pub fn new(owner_id: impl Into<String>, descriptor: Vec<f32>) -> Self {
        Self {
            descriptor,
            owner_id: owner_id.into(),
            created_at: Utc::now(),
        }
    }
}
