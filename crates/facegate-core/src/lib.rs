//! facegate-core — face quality, liveness and identity matching.
//!
//! Detection runs through a tiered fallback chain (SeetaFace cascade, SCRFD
//! via ONNX Runtime, skin-tone clustering, synthetic centered box). Detected
//! faces are scored for capture quality, checked for liveness, turned into
//! 128-element descriptors and matched against enrolled templates.

pub mod alignment;
pub mod detector;
pub mod embedding;
pub mod feedback;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use detector::{Capability, ChainConfig, DetectorChain, DetectorError, FaceDetect};
pub use embedding::{EmbeddingError, EmbeddingExtractor, EmbeddingPipeline, ImageGate};
pub use feedback::Guidance;
pub use frame::{Frame, FrameError, Region};
pub use liveness::{LivenessAssessor, LivenessConfig, LivenessMode, LivenessResult};
pub use matcher::{compare_faces, find_best_match, Comparison, MatchResult, Matcher, Metric};
pub use quality::{QualityScore, QualityScorer, QualityWeights};
pub use types::{Detection, DetectorKind, Embedding, FaceTemplate, Landmarks, DESCRIPTOR_LEN};
