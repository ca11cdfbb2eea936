//! Heuristic liveness assessment on a captured still.
//!
//! Two texture statistics over the face region decide the score: mean
//! neighbour luminance delta ("texture") and the share of pixels sitting on a
//! strong edge. Printed or replayed faces tend to be either too flat or too
//! noisy. When the caller has eye landmarks from the preceding real-time
//! ticks, a landmark-motion sub-check additionally rejects perfectly static
//! subjects.
//!
//! None of this is anti-spoofing grade. The assessor sits behind a plain
//! method so a trained model can replace it without touching detection or
//! quality scoring.

use crate::frame::{Frame, Region};
use crate::types::{Detection, Landmarks, LEFT_EYE, RIGHT_EYE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Luminance delta between neighbours that counts as an edge.
const EDGE_DELTA: i32 = 30;
/// Plausible mean texture per pixel for a real face.
const TEXTURE_BAND: (f32, f32) = (15.0, 100.0);
/// Plausible share of edge pixels for a real face.
const EDGE_RATIO_BAND: (f32, f32) = (0.1, 0.4);
const TEXTURE_WEIGHT: f32 = 0.4;
const EDGE_WEIGHT: f32 = 0.4;
/// Upper bound (exclusive) of the permissive-mode jitter.
const PERMISSIVE_JITTER: f32 = 0.2;
/// Minimum mean eye displacement between consecutive ticks, in pixels.
pub const DEFAULT_MIN_EYE_DISPLACEMENT: f32 = 0.8;

pub const SUBCHECK_TEXTURE: &str = "texture";
pub const SUBCHECK_EDGES: &str = "edges";
pub const SUBCHECK_LANDMARK_MOTION: &str = "landmark_motion";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessMode {
    /// Deterministic score.
    #[default]
    Strict,
    /// Adds a small random term to the score.
    Permissive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// `is_live` requires `score > threshold`.
    pub threshold: f32,
    pub mode: LivenessMode,
    pub min_eye_displacement: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            mode: LivenessMode::Strict,
            min_eye_displacement: DEFAULT_MIN_EYE_DISPLACEMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub score: f32,
    pub is_live: bool,
    /// Named sub-check outcomes.
    pub subchecks: BTreeMap<String, bool>,
    /// Mean neighbour luminance delta per pixel.
    pub texture: f32,
    /// Share of face pixels on a strong edge.
    pub edge_ratio: f32,
    /// Mean eye displacement across the supplied landmark history.
    pub mean_eye_displacement: Option<f32>,
}

/// Outcome of the landmark-motion sub-check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkMotion {
    pub passed: bool,
    pub mean_eye_displacement: f32,
    pub frame_pairs: usize,
}

/// Mean eye displacement across consecutive landmark sets.
///
/// Fewer than two sets cannot be judged and pass.
pub fn check_landmark_motion(history: &[Landmarks], min_displacement: f32) -> LandmarkMotion {
    if history.len() < 2 {
        return LandmarkMotion {
            passed: true,
            mean_eye_displacement: 0.0,
            frame_pairs: 0,
        };
    }

    let disp = |a: (f32, f32), b: (f32, f32)| ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    let total: f32 = history
        .windows(2)
        .map(|pair| {
            let (prev, curr) = (&pair[0], &pair[1]);
            (disp(prev[LEFT_EYE], curr[LEFT_EYE]) + disp(prev[RIGHT_EYE], curr[RIGHT_EYE])) / 2.0
        })
        .sum();
    let pairs = history.len() - 1;
    let mean = total / pairs as f32;

    LandmarkMotion {
        passed: mean >= min_displacement,
        mean_eye_displacement: mean,
        frame_pairs: pairs,
    }
}

#[derive(Debug, Clone, Default)]
pub struct LivenessAssessor {
    config: LivenessConfig,
}

impl LivenessAssessor {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Assess the face inside `detection`. `history` holds landmarks from recent ticks, oldest first.
    pub fn assess(&self, frame: &Frame, detection: &Detection, history: &[Landmarks]) -> LivenessResult {
        let (texture, edge_ratio) = match Region::from_detection(detection, frame.width, frame.height) {
            Some(region) => texture_stats(&frame.region_luma(&region), region.width, region.height),
            None => (0.0, 0.0),
        };

        let texture_ok = (TEXTURE_BAND.0..=TEXTURE_BAND.1).contains(&texture);
        let edges_ok = (EDGE_RATIO_BAND.0..=EDGE_RATIO_BAND.1).contains(&edge_ratio);

        let mut score = 0.0;
        if texture_ok {
            score += TEXTURE_WEIGHT;
        }
        if edges_ok {
            score += EDGE_WEIGHT;
        }
        if self.config.mode == LivenessMode::Permissive {
            score += rand::thread_rng().gen_range(0.0..PERMISSIVE_JITTER);
        }
        let score = score.clamp(0.0, 1.0);

        let mut subchecks = BTreeMap::new();
        subchecks.insert(SUBCHECK_TEXTURE.to_string(), texture_ok);
        subchecks.insert(SUBCHECK_EDGES.to_string(), edges_ok);

        let mut is_live = score > self.config.threshold;
        let mut mean_eye_displacement = None;
        if history.len() >= 2 {
            let motion = check_landmark_motion(history, self.config.min_eye_displacement);
            subchecks.insert(SUBCHECK_LANDMARK_MOTION.to_string(), motion.passed);
            mean_eye_displacement = Some(motion.mean_eye_displacement);
            is_live &= motion.passed;
        }

        tracing::debug!(score, texture, edge_ratio, is_live, "liveness assessed");

        LivenessResult {
            score,
            is_live,
            subchecks,
            texture,
            edge_ratio,
            mean_eye_displacement,
        }
    }
}

/// (mean neighbour delta per pixel, edge pixel ratio) of a luminance plane.
fn texture_stats(gray: &[u8], width: u32, height: u32) -> (f32, f32) {
    let (w, h) = (width as usize, height as usize);
    let pixels = w * h;
    if pixels == 0 || gray.len() < pixels {
        return (0.0, 0.0);
    }

    let mut total_delta = 0u64;
    let mut edges = 0usize;
    for y in 0..h.saturating_sub(1) {
        for x in 0..w.saturating_sub(1) {
            let p = gray[y * w + x] as i32;
            let right = (p - gray[y * w + x + 1] as i32).abs();
            let below = (p - gray[(y + 1) * w + x] as i32).abs();
            total_delta += (right + below) as u64;
            if right > EDGE_DELTA || below > EDGE_DELTA {
                edges += 1;
            }
        }
    }

    (
        total_delta as f32 / pixels as f32,
        edges as f32 / pixels as f32,
    )
}
