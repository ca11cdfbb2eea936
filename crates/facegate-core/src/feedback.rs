//! Actionable guidance derived from quality sub-scores.

use crate::quality::QualityScore;
use serde::{Deserialize, Serialize};

/// Sub-scores below this produce a corrective hint.
pub const SUB_SCORE_THRESHOLD: f32 = 0.7;
/// Overall scores at or above this produce only a positive acknowledgment.
pub const EXCELLENT_THRESHOLD: f32 = 0.8;

/// Face area ratio above which a small `size` score means "too close".
const TOO_CLOSE_RATIO: f32 = 0.6;
/// Luminance above which a poor `lighting` score means glare rather than darkness.
const GLARE_LUMINANCE: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guidance {
    LooksGood,
    FaceNotClear,
    MoveCloser,
    MoveBack,
    CenterFace,
    FaceCamera,
    TurnTowardCamera,
    ImproveLighting,
    ReduceGlare,
    HoldStill,
    AlmostThere,
}

impl Guidance {
    pub fn message(&self) -> &'static str {
        match self {
            Self::LooksGood => "Looks good, hold this position",
            Self::FaceNotClear => "Face not detected clearly",
            Self::MoveCloser => "Move closer to the camera",
            Self::MoveBack => "Move back a little",
            Self::CenterFace => "Center your face in the frame",
            Self::FaceCamera => "Face the camera straight on",
            Self::TurnTowardCamera => "Turn your head toward the camera",
            Self::ImproveLighting => "Improve lighting on your face",
            Self::ReduceGlare => "Reduce glare or bright light behind the camera",
            Self::HoldStill => "Hold still",
            Self::AlmostThere => "Almost there, adjust your position slightly",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::LooksGood)
    }
}

impl std::fmt::Display for Guidance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Map sub-scores to an ordered list of hints.
pub fn generate(score: &QualityScore) -> Vec<Guidance> {
    if score.overall >= EXCELLENT_THRESHOLD {
        return vec![Guidance::LooksGood];
    }

    let low = |v: f32| v < SUB_SCORE_THRESHOLD;
    let mut hints = Vec::new();

    if low(score.size) {
        hints.push(if score.face_area_ratio > TOO_CLOSE_RATIO {
            Guidance::MoveBack
        } else {
            Guidance::MoveCloser
        });
    }
    if low(score.position) {
        hints.push(Guidance::CenterFace);
    }
    if low(score.angle) {
        hints.push(Guidance::FaceCamera);
    } else if low(score.symmetry) {
        hints.push(Guidance::TurnTowardCamera);
    }
    if low(score.lighting) {
        let glare = score.mean_luminance.is_some_and(|l| l > GLARE_LUMINANCE);
        hints.push(if glare {
            Guidance::ReduceGlare
        } else {
            Guidance::ImproveLighting
        });
    }
    if low(score.sharpness) {
        hints.push(Guidance::HoldStill);
    }

    if hints.is_empty() {
        hints.push(Guidance::AlmostThere);
    }
    hints
}
