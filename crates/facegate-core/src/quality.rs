//! Multi-factor face quality scoring.
//!
//! Six sub-scores in [0, 1] (size, position, angle, sharpness, lighting,
//! symmetry) are combined with a fixed weight table that sums to 1.0.
//! Scoring is a pure function of the detection, the frame dimensions and the
//! face-region luminance, so identical input always yields the identical score.

use crate::feedback::{self, Guidance};
use crate::frame::{Frame, Region};
use crate::types::{Detection, Landmarks, LEFT_EYE, LEFT_MOUTH, NOSE, RIGHT_EYE, RIGHT_MOUTH};
use serde::{Deserialize, Serialize};

/// Face area / frame area band that scores 1.0.
const SIZE_BAND: (f32, f32) = (0.10, 0.60);
/// Mean face luminance band that scores 1.0.
const LIGHTING_BAND: (f32, f32) = (100.0, 200.0);
/// Sub-score used when landmarks or pixels are unavailable.
const NEUTRAL: f32 = 0.5;
const SYMMETRY_FLOOR: f32 = 0.3;
/// Sampling stride for face-region luminance.
const LUMA_STRIDE: usize = 2;
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Weight of each sub-score in `overall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub size: f32,
    pub position: f32,
    pub angle: f32,
    pub sharpness: f32,
    pub lighting: f32,
    pub symmetry: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            size: 0.2,
            position: 0.15,
            angle: 0.25,
            sharpness: 0.15,
            lighting: 0.15,
            symmetry: 0.1,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f32 {
        self.size + self.position + self.angle + self.sharpness + self.lighting + self.symmetry
    }

    /// All weights non-negative and summing to 1.0.
    pub fn is_valid(&self) -> bool {
        let all = [
            self.size,
            self.position,
            self.angle,
            self.sharpness,
            self.lighting,
            self.symmetry,
        ];
        all.iter().all(|w| w.is_finite() && *w >= 0.0)
            && (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }
}

/// Composite quality of one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f32,
    pub size: f32,
    pub position: f32,
    pub angle: f32,
    pub sharpness: f32,
    pub lighting: f32,
    pub symmetry: f32,
    /// Face box area over frame area.
    pub face_area_ratio: f32,
    /// Mean face-region luminance (0–255), when pixels were available.
    pub mean_luminance: Option<f32>,
    pub feedback: Vec<Guidance>,
}

impl QualityScore {
    /// Zero score for a missing or malformed box.
    fn rejected() -> Self {
        Self {
            overall: 0.0,
            size: 0.0,
            position: 0.0,
            angle: 0.0,
            sharpness: 0.0,
            lighting: 0.0,
            symmetry: 0.0,
            face_area_ratio: 0.0,
            mean_luminance: None,
            feedback: vec![Guidance::FaceNotClear],
        }
    }

    /// Feedback rendered as user-facing strings.
    pub fn messages(&self) -> Vec<String> {
        self.feedback.iter().map(|g| g.to_string()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    /// Score a detection against the frame it came from.
    pub fn score(&self, detection: &Detection, frame: &Frame) -> QualityScore {
        let luminance = Region::from_detection(detection, frame.width, frame.height)
            .map(|region| region_mean_luma(frame, &region));
        self.score_with_luminance(detection, frame.width, frame.height, luminance)
    }

    /// Score from geometry alone plus an optional precomputed face luminance.
    pub fn score_with_luminance(
        &self,
        detection: &Detection,
        frame_width: u32,
        frame_height: u32,
        mean_luminance: Option<f32>,
    ) -> QualityScore {
        if !detection.is_valid() || frame_width == 0 || frame_height == 0 {
            return QualityScore::rejected();
        }

        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let face_area_ratio = detection.area() / (fw * fh);

        let size = size_score(face_area_ratio);
        let position = position_score(detection, fw, fh);
        let (angle, symmetry) = match &detection.landmarks {
            Some(lms) => (angle_score(lms), symmetry_score(lms)),
            None => (NEUTRAL, NEUTRAL),
        };
        let sharpness = detection.confidence.clamp(0.0, 1.0);
        let lighting = mean_luminance.map(lighting_score).unwrap_or(NEUTRAL);

        let w = &self.weights;
        let overall = (size * w.size
            + position * w.position
            + angle * w.angle
            + sharpness * w.sharpness
            + lighting * w.lighting
            + symmetry * w.symmetry)
            .clamp(0.0, 1.0);

        let mut score = QualityScore {
            overall,
            size,
            position,
            angle,
            sharpness,
            lighting,
            symmetry,
            face_area_ratio,
            mean_luminance,
            feedback: Vec::new(),
        };
        score.feedback = feedback::generate(&score);
        score
    }
}

fn region_mean_luma(frame: &Frame, region: &Region) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0u32;
    for y in (region.y..region.y + region.height).step_by(LUMA_STRIDE) {
        for x in (region.x..region.x + region.width).step_by(LUMA_STRIDE) {
            total += frame.luma(x, y);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

/// 1.0 inside the ideal band, falling linearly to 0 outside it.
fn band_score(value: f32, (lo, hi): (f32, f32), max: f32) -> f32 {
    if value < lo {
        (value / lo).clamp(0.0, 1.0)
    } else if value > hi {
        (1.0 - (value - hi) / (max - hi)).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn size_score(area_ratio: f32) -> f32 {
    band_score(area_ratio, SIZE_BAND, 1.0)
}

fn lighting_score(luminance: f32) -> f32 {
    band_score(luminance, LIGHTING_BAND, 255.0)
}

/// 1 − distance of the box centre from the frame centre, normalized so a corner scores 0.
fn position_score(det: &Detection, fw: f32, fh: f32) -> f32 {
    let (cx, cy) = det.center();
    let dx = (cx - fw / 2.0) / (fw / 2.0);
    let dy = (cy - fh / 2.0) / (fh / 2.0);
    let dist = (dx * dx + dy * dy).sqrt() / std::f32::consts::SQRT_2;
    (1.0 - dist).clamp(0.0, 1.0)
}

/// Absolute inclination of the line between two points, in degrees (0–90).
fn line_tilt_degrees(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = (b.0 - a.0).abs();
    let dy = (b.1 - a.1).abs();
    dy.atan2(dx).to_degrees()
}

fn angle_score(lms: &Landmarks) -> f32 {
    let eyes = line_tilt_degrees(lms[LEFT_EYE], lms[RIGHT_EYE]);
    let mouth = line_tilt_degrees(lms[LEFT_MOUTH], lms[RIGHT_MOUTH]);
    match (eyes + mouth) / 2.0 {
        t if t <= 5.0 => 1.0,
        t if t <= 10.0 => 0.8,
        t if t <= 15.0 => 0.6,
        t if t <= 25.0 => 0.4,
        _ => 0.2,
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Balance of left/right distances from the nose tip to eyes and mouth corners.
fn symmetry_score(lms: &Landmarks) -> f32 {
    let ratio = |left: (f32, f32), right: (f32, f32)| {
        let dl = distance(lms[NOSE], left);
        let dr = distance(lms[NOSE], right);
        let max = dl.max(dr);
        if max > 0.0 {
            dl.min(dr) / max
        } else {
            0.0
        }
    };
    let eyes = ratio(lms[LEFT_EYE], lms[RIGHT_EYE]);
    let mouth = ratio(lms[LEFT_MOUTH], lms[RIGHT_MOUTH]);
    ((eyes + mouth) / 2.0).max(SYMMETRY_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::EXCELLENT_THRESHOLD;
    use crate::types::DetectorKind;

    /// Frontal, symmetric landmarks for a face box at (220, 140, 200, 200).
    fn frontal() -> Landmarks {
        [
            (280.0, 200.0),
            (360.0, 200.0),
            (320.0, 240.0),
            (290.0, 290.0),
            (350.0, 290.0),
        ]
    }

    fn centered_face(confidence: f32) -> Detection {
        Detection::new(220.0, 140.0, 200.0, 200.0, confidence, DetectorKind::Model)
            .with_landmarks(frontal())
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = QualityWeights::default();
        assert!((w.sum() - 1.0).abs() < 1e-6);
        assert!(w.is_valid());
    }

    #[test]
    fn test_invalid_weights_detected() {
        let w = QualityWeights {
            angle: 0.5,
            ..QualityWeights::default()
        };
        assert!(!w.is_valid());
        let w = QualityWeights {
            size: -0.1,
            angle: 0.55,
            ..QualityWeights::default()
        };
        assert!(!w.is_valid());
    }

    #[test]
    fn test_ideal_face_scores_high() {
        let q = QualityScorer::default().score_with_luminance(&centered_face(0.95), 640, 480, Some(150.0));
        assert_eq!(q.size, 1.0);
        assert!((q.position - 1.0).abs() < 1e-6);
        assert_eq!(q.angle, 1.0);
        assert!((q.symmetry - 1.0).abs() < 1e-6);
        assert_eq!(q.lighting, 1.0);
        assert!(q.overall >= 0.8, "overall = {}", q.overall);
        assert_eq!(q.feedback, vec![Guidance::LooksGood]);
    }

    #[test]
    fn test_overall_is_weighted_sum() {
        let scorer = QualityScorer::default();
        let det = Detection::new(10.0, 10.0, 60.0, 60.0, 0.6, DetectorKind::Heuristic);
        let q = scorer.score_with_luminance(&det, 640, 480, Some(60.0));
        let w = scorer.weights();
        let expected = q.size * w.size
            + q.position * w.position
            + q.angle * w.angle
            + q.sharpness * w.sharpness
            + q.lighting * w.lighting
            + q.symmetry * w.symmetry;
        assert!((q.overall - expected).abs() < 1e-6);
    }

    #[test]
    fn test_missing_landmarks_are_neutral() {
        let det = Detection::new(220.0, 140.0, 200.0, 200.0, 0.9, DetectorKind::Heuristic);
        let q = QualityScorer::default().score_with_luminance(&det, 640, 480, Some(150.0));
        assert_eq!(q.angle, 0.5);
        assert_eq!(q.symmetry, 0.5);
    }

    #[test]
    fn test_missing_luminance_is_neutral() {
        let q = QualityScorer::default().score_with_luminance(&centered_face(0.9), 640, 480, None);
        assert_eq!(q.lighting, 0.5);
    }

    #[test]
    fn test_invalid_box_scores_zero_with_diagnostic() {
        let det = Detection::new(0.0, 0.0, -5.0, 10.0, 0.9, DetectorKind::Model);
        let q = QualityScorer::default().score_with_luminance(&det, 640, 480, Some(150.0));
        assert_eq!(q.overall, 0.0);
        assert_eq!(q.feedback, vec![Guidance::FaceNotClear]);

        let q = QualityScorer::default().score_with_luminance(&centered_face(0.9), 0, 0, None);
        assert_eq!(q.overall, 0.0);
    }

    #[test]
    fn test_score_is_deterministic() {
        let scorer = QualityScorer::default();
        let det = centered_face(0.77);
        let a = scorer.score_with_luminance(&det, 640, 480, Some(123.0));
        let b = scorer.score_with_luminance(&det, 640, 480, Some(123.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_band() {
        assert_eq!(size_score(0.3), 1.0);
        assert!((size_score(0.05) - 0.5).abs() < 1e-6);
        assert!((size_score(0.8) - 0.5).abs() < 1e-6);
        assert_eq!(size_score(1.0), 0.0);
        assert_eq!(size_score(0.0), 0.0);
    }

    #[test]
    fn test_lighting_band() {
        assert_eq!(lighting_score(150.0), 1.0);
        assert!((lighting_score(50.0) - 0.5).abs() < 1e-6);
        assert_eq!(lighting_score(255.0), 0.0);
        assert_eq!(lighting_score(0.0), 0.0);
    }

    #[test]
    fn test_position_corner_is_zero() {
        let corner = Detection::new(-10.0, -10.0, 20.0, 20.0, 0.9, DetectorKind::Model);
        assert!(position_score(&corner, 640.0, 480.0) < 1e-6);
    }

    #[test]
    fn test_angle_steps() {
        let tilted = |deg: f32| {
            let r = deg.to_radians();
            let (dx, dy) = (80.0 * r.cos(), 80.0 * r.sin());
            let mut lms = frontal();
            lms[RIGHT_EYE] = (lms[LEFT_EYE].0 + dx, lms[LEFT_EYE].1 + dy);
            lms[RIGHT_MOUTH] = (lms[LEFT_MOUTH].0 + dx, lms[LEFT_MOUTH].1 + dy);
            angle_score(&lms)
        };
        assert_eq!(tilted(0.0), 1.0);
        assert_eq!(tilted(4.0), 1.0);
        assert_eq!(tilted(8.0), 0.8);
        assert_eq!(tilted(12.0), 0.6);
        assert_eq!(tilted(20.0), 0.4);
        assert_eq!(tilted(40.0), 0.2);
    }

    #[test]
    fn test_symmetry_floor() {
        let mut lms = frontal();
        // Nose pushed onto the right eye and right mouth corner line.
        lms[NOSE] = (359.0, 240.0);
        lms[RIGHT_EYE] = (360.0, 240.0);
        lms[RIGHT_MOUTH] = (359.0, 241.0);
        assert!((symmetry_score(&lms) - SYMMETRY_FLOOR).abs() < 1e-6);
    }

    #[test]
    fn test_score_reads_frame_luminance() {
        let frame = Frame::from_gray(&vec![10u8; 640 * 480], 640, 480).unwrap();
        let q = QualityScorer::default().score(&centered_face(0.3), &frame);
        let lum = q.mean_luminance.unwrap();
        assert!((lum - 10.0).abs() < 0.5);
        assert!((q.lighting - 0.1).abs() < 0.01);
        assert!(q.overall < EXCELLENT_THRESHOLD);
        assert!(q.feedback.contains(&Guidance::ImproveLighting));
        assert!(q.feedback.contains(&Guidance::HoldStill));
    }
}
