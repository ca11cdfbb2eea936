//! Tiered face detection.
//!
//! Tiers are tried in a fixed order and the first one that yields a usable
//! face wins: native cascade, SCRFD model, skin-tone clustering, and (only
//! when the caller forces a best-effort result) a synthetic centered box.
//! A tier that errors, panics, finds nothing, or overruns the tick budget is
//! logged and skipped; the chain itself never fails.

pub mod centered;
pub mod native;
pub mod scrfd;
pub mod skin;

use crate::frame::Frame;
use crate::types::{Detection, DetectorKind};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use centered::{CenteredConfig, CenteredFallback};
pub use native::SeetaFaceDetector;
pub use scrfd::ScrfdDetector;
pub use skin::{SkinToneConfig, SkinToneDetector};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{tier} detector exceeded its {budget_ms} ms budget")]
    Timeout { tier: DetectorKind, budget_ms: u64 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A single detection tier.
pub trait FaceDetect {
    fn kind(&self) -> DetectorKind;

    /// Detect faces in `frame`. Order of the returned detections is not significant;
    /// the chain sorts them by confidence.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Best detection capability found when the chain was built. Resolved once, never re-probed.
///
/// The chain only runs the trained tiers its capability admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    NativeAvailable,
    MlAvailable,
    None,
}

impl Capability {
    pub fn resolve(native: bool, model: bool) -> Self {
        match (native, model) {
            (true, _) => Self::NativeAvailable,
            (false, true) => Self::MlAvailable,
            (false, false) => Self::None,
        }
    }

    pub fn admits_native(self) -> bool {
        self == Self::NativeAvailable
    }

    pub fn admits_model(self) -> bool {
        self != Self::None
    }
}

/// Which tiers to build and where their models live.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// SeetaFace cascade model; `None` disables the native tier.
    pub native_model: Option<PathBuf>,
    /// SCRFD ONNX model; `None` disables the model tier.
    pub scrfd_model: Option<PathBuf>,
    pub heuristic: bool,
    pub centered: bool,
    /// Wall-clock budget for one `detect` call (normally the polling interval).
    pub budget: Duration,
    pub skin: SkinToneConfig,
    pub centered_box: CenteredConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            native_model: None,
            scrfd_model: None,
            heuristic: true,
            centered: true,
            budget: Duration::from_millis(150),
            skin: SkinToneConfig::default(),
            centered_box: CenteredConfig::default(),
        }
    }
}

/// Ordered fallback chain of detector tiers.
pub struct DetectorChain {
    tiers: Vec<Box<dyn FaceDetect>>,
    centered: Option<CenteredFallback>,
    capability: Capability,
    budget: Duration,
}

impl DetectorChain {
    /// Build the chain, loading whichever models are configured.
    ///
    /// A model that fails to load disables its tier; construction itself cannot fail.
    pub fn from_config(config: &ChainConfig) -> Self {
        let native = config.native_model.as_ref().and_then(|path| {
            match SeetaFaceDetector::load(path) {
                Ok(d) => Some(Box::new(d) as Box<dyn FaceDetect>),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "native detector unavailable; tier disabled");
                    None
                }
            }
        });

        let model = config.scrfd_model.as_ref().and_then(|path| {
            match ScrfdDetector::load(path) {
                Ok(d) => Some(Box::new(d) as Box<dyn FaceDetect>),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "SCRFD detector unavailable; tier disabled");
                    None
                }
            }
        });

        Self::new(native, model, config)
    }

    /// Assemble a chain from already-constructed native/model tiers, probing
    /// the capability from which of them exist.
    pub fn new(
        native: Option<Box<dyn FaceDetect>>,
        model: Option<Box<dyn FaceDetect>>,
        config: &ChainConfig,
    ) -> Self {
        let capability = Capability::resolve(native.is_some(), model.is_some());
        Self::with_capability(capability, native, model, config)
    }

    /// Assemble a chain under an already-resolved capability. Trained tiers the
    /// capability does not admit are dropped.
    pub fn with_capability(
        capability: Capability,
        native: Option<Box<dyn FaceDetect>>,
        model: Option<Box<dyn FaceDetect>>,
        config: &ChainConfig,
    ) -> Self {
        let native = native.filter(|_| capability.admits_native());
        let model = model.filter(|_| capability.admits_model());

        let mut tiers: Vec<Box<dyn FaceDetect>> = Vec::with_capacity(3);
        tiers.extend(native);
        tiers.extend(model);
        if config.heuristic {
            tiers.push(Box::new(SkinToneDetector::new(config.skin.clone())));
        }

        let centered = config
            .centered
            .then(|| CenteredFallback::new(config.centered_box.clone()));

        tracing::info!(
            ?capability,
            tiers = ?tiers.iter().map(|t| t.kind()).collect::<Vec<_>>(),
            centered = centered.is_some(),
            budget_ms = config.budget.as_millis() as u64,
            "detector chain ready"
        );

        Self {
            tiers,
            centered,
            capability,
            budget: config.budget,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Kinds of the tiers that will be tried, in order (centered fallback excluded).
    pub fn tier_kinds(&self) -> Vec<DetectorKind> {
        self.tiers.iter().map(|t| t.kind()).collect()
    }

    /// Run the tiers in order and return the first non-empty result, sorted by
    /// descending confidence. With `force`, an exhausted chain falls back to a
    /// synthetic centered box instead of returning nothing.
    pub fn detect(&mut self, frame: &Frame, force: bool) -> Vec<Detection> {
        if frame.is_empty() {
            tracing::debug!("empty frame; skipping detection");
            return Vec::new();
        }

        let started = Instant::now();
        for tier in self.tiers.iter_mut() {
            if started.elapsed() >= self.budget {
                tracing::debug!(
                    skipped = %tier.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tick budget exhausted; skipping remaining tiers"
                );
                break;
            }
            if let Some(found) = run_tier(tier.as_mut(), frame, self.budget) {
                return found;
            }
        }

        match (&self.centered, force) {
            (Some(fallback), true) => {
                tracing::debug!("all tiers exhausted; using centered fallback");
                vec![fallback.place(frame.width, frame.height)]
            }
            _ => Vec::new(),
        }
    }
}

/// Run one tier, swallowing every failure mode.
fn run_tier(tier: &mut dyn FaceDetect, frame: &Frame, budget: Duration) -> Option<Vec<Detection>> {
    let kind = tier.kind();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| tier.detect(frame)));
    let elapsed = started.elapsed();

    let mut found = match outcome {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            tracing::warn!(tier = %kind, error = %e, "detector tier failed; advancing");
            return None;
        }
        Err(_) => {
            tracing::warn!(tier = %kind, "detector tier panicked; advancing");
            return None;
        }
    };

    if elapsed > budget {
        let e = DetectorError::Timeout {
            tier: kind,
            budget_ms: budget.as_millis() as u64,
        };
        tracing::warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "result discarded");
        return None;
    }

    found.retain(Detection::is_valid);
    if found.is_empty() {
        tracing::trace!(tier = %kind, "no face");
        return None;
    }

    for det in found.iter_mut() {
        det.confidence = det.confidence.clamp(0.0, 1.0);
    }
    sort_by_confidence(&mut found);
    tracing::trace!(tier = %kind, count = found.len(), best = found[0].confidence, "tier hit");
    Some(found)
}

pub(crate) fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        kind: DetectorKind,
        reply: fn() -> Result<Vec<Detection>, DetectorError>,
    }

    impl FaceDetect for Scripted {
        fn kind(&self) -> DetectorKind {
            self.kind
        }
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            (self.reply)()
        }
    }

    struct Slow;

    impl FaceDetect for Slow {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Model
        }
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            std::thread::sleep(Duration::from_millis(30));
            Ok(vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.99, DetectorKind::Model)])
        }
    }

    struct Panics;

    impl FaceDetect for Panics {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Native
        }
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            panic!("Illegal image");
        }
    }

    fn boxed(kind: DetectorKind, reply: fn() -> Result<Vec<Detection>, DetectorError>) -> Box<dyn FaceDetect> {
        Box::new(Scripted { kind, reply })
    }

    fn gray_frame() -> Frame {
        Frame::from_gray(&vec![128u8; 64 * 48], 64, 48).unwrap()
    }

    fn no_heuristic() -> ChainConfig {
        ChainConfig {
            heuristic: false,
            ..ChainConfig::default()
        }
    }

    #[test]
    fn test_capability_resolution() {
        assert_eq!(Capability::resolve(true, true), Capability::NativeAvailable);
        assert_eq!(Capability::resolve(true, false), Capability::NativeAvailable);
        assert_eq!(Capability::resolve(false, true), Capability::MlAvailable);
        assert_eq!(Capability::resolve(false, false), Capability::None);
    }

    #[test]
    fn test_injected_capability_selects_tiers() {
        fn hit() -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![Detection::new(1.0, 1.0, 10.0, 10.0, 0.8, DetectorKind::Model)])
        }

        let chain = DetectorChain::with_capability(
            Capability::MlAvailable,
            Some(boxed(DetectorKind::Native, hit)),
            Some(boxed(DetectorKind::Model, hit)),
            &no_heuristic(),
        );
        assert_eq!(chain.capability(), Capability::MlAvailable);
        assert_eq!(chain.tier_kinds(), vec![DetectorKind::Model]);

        let mut chain = DetectorChain::with_capability(
            Capability::None,
            Some(boxed(DetectorKind::Native, hit)),
            Some(boxed(DetectorKind::Model, hit)),
            &no_heuristic(),
        );
        assert!(chain.tier_kinds().is_empty());
        assert!(chain.detect(&gray_frame(), false).is_empty());

        let chain = DetectorChain::new(
            Some(boxed(DetectorKind::Native, hit)),
            Some(boxed(DetectorKind::Model, hit)),
            &no_heuristic(),
        );
        assert_eq!(chain.capability(), Capability::NativeAvailable);
        assert_eq!(chain.tier_kinds(), vec![DetectorKind::Native, DetectorKind::Model]);
    }

    #[test]
    fn test_first_non_empty_tier_wins_sorted() {
        let native = boxed(DetectorKind::Native, || Ok(vec![]));
        let model = boxed(DetectorKind::Model, || {
            Ok(vec![
                Detection::new(0.0, 0.0, 10.0, 10.0, 0.6, DetectorKind::Model),
                Detection::new(20.0, 0.0, 10.0, 10.0, 0.9, DetectorKind::Model),
            ])
        });
        let mut chain = DetectorChain::new(Some(native), Some(model), &no_heuristic());
        let found = chain.detect(&gray_frame(), false);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source, DetectorKind::Model);
        assert!((found[0].confidence - 0.9).abs() < 1e-6);
        assert!(found[0].confidence >= found[1].confidence);
    }

    #[test]
    fn test_failing_tier_falls_through() {
        let native = boxed(DetectorKind::Native, || {
            Err(DetectorError::InferenceFailed("boom".into()))
        });
        let model = boxed(DetectorKind::Model, || {
            Ok(vec![Detection::new(1.0, 1.0, 10.0, 10.0, 0.8, DetectorKind::Model)])
        });
        let mut chain = DetectorChain::new(Some(native), Some(model), &no_heuristic());
        let found = chain.detect(&gray_frame(), false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, DetectorKind::Model);
    }

    #[test]
    fn test_panicking_tier_is_contained() {
        let model = boxed(DetectorKind::Model, || {
            Ok(vec![Detection::new(1.0, 1.0, 10.0, 10.0, 0.8, DetectorKind::Model)])
        });
        let mut chain = DetectorChain::new(Some(Box::new(Panics)), Some(model), &no_heuristic());
        assert_eq!(chain.detect(&gray_frame(), false).len(), 1);
    }

    #[test]
    fn test_invalid_boxes_are_dropped() {
        let model = boxed(DetectorKind::Model, || {
            Ok(vec![Detection::new(1.0, 1.0, 0.0, 10.0, 0.8, DetectorKind::Model)])
        });
        let mut chain = DetectorChain::new(None, Some(model), &no_heuristic());
        assert!(chain.detect(&gray_frame(), false).is_empty());
    }

    #[test]
    fn test_overrunning_tier_is_discarded() {
        let config = ChainConfig {
            heuristic: false,
            budget: Duration::from_millis(5),
            ..ChainConfig::default()
        };
        let mut chain = DetectorChain::new(None, Some(Box::new(Slow)), &config);
        assert!(chain.detect(&gray_frame(), false).is_empty());
    }

    #[test]
    fn test_exhausted_chain_empty_unless_forced() {
        let mut chain = DetectorChain::new(None, None, &ChainConfig::default());
        assert_eq!(chain.capability(), Capability::None);
        assert!(chain.detect(&gray_frame(), false).is_empty());

        let forced = chain.detect(&gray_frame(), true);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].source, DetectorKind::Centered);
        assert!(forced[0].confidence >= 0.70 && forced[0].confidence <= 0.75);
    }

    #[test]
    fn test_forced_without_centered_tier_stays_empty() {
        let config = ChainConfig {
            heuristic: false,
            centered: false,
            ..ChainConfig::default()
        };
        let mut chain = DetectorChain::new(None, None, &config);
        assert!(chain.detect(&gray_frame(), true).is_empty());
    }

    #[test]
    fn test_empty_frame_never_reaches_tiers() {
        let mut chain = DetectorChain::new(None, None, &ChainConfig::default());
        let empty = Frame::from_rgb(Vec::new(), 0, 0).unwrap();
        assert!(chain.detect(&empty, true).is_empty());
    }

    #[test]
    fn test_missing_model_files_disable_tiers() {
        let config = ChainConfig {
            native_model: Some(PathBuf::from("/nonexistent/seeta.bin")),
            scrfd_model: Some(PathBuf::from("/nonexistent/det.onnx")),
            ..ChainConfig::default()
        };
        let chain = DetectorChain::from_config(&config);
        assert_eq!(chain.capability(), Capability::None);
        assert_eq!(chain.tier_kinds(), vec![DetectorKind::Heuristic]);
    }
}
