//! Skin-tone block clustering, the model-free detector tier.
//!
//! The frame is cut into fixed blocks; each block is sampled on a sparse grid
//! and classified as skin when enough samples pass the RGB rules below. Skin
//! blocks are grouped by single-linkage clustering on block centres, and the
//! largest cluster's envelope is widened to approximate the full face, since
//! skin pixels usually cover only the cheeks, nose and forehead.

use super::{DetectorError, FaceDetect};
use crate::frame::Frame;
use crate::types::{Detection, DetectorKind};
use serde::{Deserialize, Serialize};

/// Tunable constants of the skin-tone tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinToneConfig {
    /// Block edge in pixels.
    pub block_size: u32,
    /// Sampling stride inside a block, in pixels.
    pub sample_stride: u32,
    /// Minimum fraction of skin samples for a block to count as skin.
    pub skin_fraction: f32,
    /// Two blocks join a cluster when their centres are closer than this (pixels).
    pub cluster_radius: f32,
    /// Clusters smaller than this are discarded.
    pub min_cluster_blocks: usize,
    pub width_expand: f32,
    pub height_expand: f32,
    pub confidence_base: f32,
    pub confidence_denominator: f32,
    pub confidence_cap: f32,
}

impl Default for SkinToneConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            sample_stride: 4,
            skin_fraction: 0.3,
            cluster_radius: 48.0,
            min_cluster_blocks: 3,
            width_expand: 1.5,
            height_expand: 1.8,
            confidence_base: 0.5,
            confidence_denominator: 100.0,
            confidence_cap: 0.85,
        }
    }
}

/// A block classified as skin, by its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SkinBlock {
    x: u32,
    y: u32,
}

impl SkinBlock {
    fn center(&self, size: u32) -> (f32, f32) {
        let half = size as f32 / 2.0;
        (self.x as f32 + half, self.y as f32 + half)
    }
}

pub struct SkinToneDetector {
    config: SkinToneConfig,
}

impl SkinToneDetector {
    pub fn new(config: SkinToneConfig) -> Self {
        Self { config }
    }

    /// Blocks whose sampled skin fraction exceeds the configured threshold.
    fn skin_blocks(&self, frame: &Frame) -> Vec<SkinBlock> {
        let size = self.config.block_size.max(1);
        let stride = self.config.sample_stride.clamp(1, size) as usize;
        let cols = frame.width / size;
        let rows = frame.height / size;

        let mut blocks = Vec::new();
        for by in 0..rows {
            for bx in 0..cols {
                let (x0, y0) = (bx * size, by * size);
                let mut samples = 0u32;
                let mut skin = 0u32;
                for y in (y0..y0 + size).step_by(stride) {
                    for x in (x0..x0 + size).step_by(stride) {
                        let [r, g, b] = frame.rgb(x, y);
                        samples += 1;
                        if is_skin(r, g, b) {
                            skin += 1;
                        }
                    }
                }
                if samples > 0 && skin as f32 / samples as f32 > self.config.skin_fraction {
                    blocks.push(SkinBlock { x: x0, y: y0 });
                }
            }
        }
        blocks
    }

    /// Single-linkage clusters of block indices, largest first; undersized clusters dropped.
    fn cluster(&self, blocks: &[SkinBlock]) -> Vec<Vec<usize>> {
        let size = self.config.block_size.max(1);
        let radius_sq = self.config.cluster_radius * self.config.cluster_radius;
        let centers: Vec<(f32, f32)> = blocks.iter().map(|b| b.center(size)).collect();

        let mut assigned = vec![false; blocks.len()];
        let mut clusters = Vec::new();

        for seed in 0..blocks.len() {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut members = vec![seed];
            let mut cursor = 0;
            while cursor < members.len() {
                let (cx, cy) = centers[members[cursor]];
                cursor += 1;
                for (j, &(ox, oy)) in centers.iter().enumerate() {
                    if !assigned[j] && (cx - ox).powi(2) + (cy - oy).powi(2) < radius_sq {
                        assigned[j] = true;
                        members.push(j);
                    }
                }
            }
            if members.len() >= self.config.min_cluster_blocks.max(1) {
                clusters.push(members);
            }
        }

        // Stable sort keeps the earliest (top-left) cluster first on ties.
        clusters.sort_by(|a, b| b.len().cmp(&a.len()));
        clusters
    }

    /// Envelope of a cluster, widened about its centre and clipped to the frame.
    fn face_box(&self, blocks: &[SkinBlock], members: &[usize], frame: &Frame) -> Detection {
        let size = self.config.block_size as f32;
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for &i in members {
            let b = blocks[i];
            min_x = min_x.min(b.x as f32);
            min_y = min_y.min(b.y as f32);
            max_x = max_x.max(b.x as f32 + size);
            max_y = max_y.max(b.y as f32 + size);
        }

        let cx = (min_x + max_x) / 2.0;
        let cy = (min_y + max_y) / 2.0;
        let w = (max_x - min_x) * self.config.width_expand;
        let h = (max_y - min_y) * self.config.height_expand;

        let x0 = (cx - w / 2.0).max(0.0);
        let y0 = (cy - h / 2.0).max(0.0);
        let x1 = (cx + w / 2.0).min(frame.width as f32);
        let y1 = (cy + h / 2.0).min(frame.height as f32);

        let confidence = (self.config.confidence_base
            + members.len() as f32 / self.config.confidence_denominator.max(1.0))
        .min(self.config.confidence_cap);

        Detection::new(x0, y0, x1 - x0, y1 - y0, confidence, DetectorKind::Heuristic)
    }
}

impl FaceDetect for SkinToneDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Heuristic
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let blocks = self.skin_blocks(frame);
        let clusters = self.cluster(&blocks);
        tracing::trace!(skin_blocks = blocks.len(), clusters = clusters.len(), "skin-tone scan");

        Ok(clusters
            .first()
            .map(|largest| vec![self.face_box(&blocks, largest, frame)])
            .unwrap_or_default())
    }
}

/// Classify one RGB pixel as skin.
///
/// Near-black and near-white pixels are rejected outright. Anything else is
/// skin if it matches any rule: daylight (broad, red-dominant), flash-lit
/// (pale, low channel spread), or deep tones (dim, strictly R>G>B).
pub fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);

    if max < 40 || min > 235 {
        return false;
    }

    let daylight = r > 95
        && g > 40
        && b > 20
        && max - min > 15
        && (r - g).abs() > 15
        && r > g
        && r > b;

    let flash = r > 220 && g > 210 && b > 170 && (r - g).abs() <= 15 && r > b && g > b;

    let deep = r > 45 && g > 25 && b > 10 && r > g && g > b && r - b > 15 && r - g < 80;

    daylight || flash || deep
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIN: [u8; 3] = [224, 172, 140];

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        Frame::from_rgb(data, width, height).unwrap()
    }

    fn with_ellipse(mut frame: Frame, left: u32, top: u32, w: u32, h: u32, rgb: [u8; 3]) -> Frame {
        let (cx, cy) = (left as f32 + w as f32 / 2.0, top as f32 + h as f32 / 2.0);
        let (rx, ry) = (w as f32 / 2.0, h as f32 / 2.0);
        for y in top..top + h {
            for x in left..left + w {
                let nx = (x as f32 + 0.5 - cx) / rx;
                let ny = (y as f32 + 0.5 - cy) / ry;
                if nx * nx + ny * ny <= 1.0 {
                    let i = (y * frame.width + x) as usize * 3;
                    frame.data[i..i + 3].copy_from_slice(&rgb);
                }
            }
        }
        frame
    }

    fn detector() -> SkinToneDetector {
        SkinToneDetector::new(SkinToneConfig::default())
    }

    #[test]
    fn test_skin_rules() {
        assert!(is_skin(224, 172, 140)); // light-medium
        assert!(is_skin(240, 225, 200)); // pale, flash-lit
        assert!(is_skin(110, 70, 45)); // deep
        assert!(!is_skin(0, 0, 0));
        assert!(!is_skin(250, 250, 250));
        assert!(!is_skin(128, 128, 128));
        assert!(!is_skin(30, 80, 200));
        assert!(!is_skin(40, 160, 60));
    }

    #[test]
    fn test_no_skin_frames_yield_nothing() {
        for rgb in [[0, 0, 0], [255, 255, 255], [30, 80, 200], [128, 128, 128]] {
            let found = detector().detect(&solid(320, 240, rgb)).unwrap();
            assert!(found.is_empty(), "unexpected detection on {rgb:?}");
        }
    }

    #[test]
    fn test_frame_smaller_than_block() {
        let found = detector().detect(&solid(8, 8, SKIN)).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_centered_ellipse_is_found_near_center() {
        let frame = with_ellipse(solid(640, 480, [0, 0, 0]), 220, 140, 200, 200, SKIN);
        let found = detector().detect(&frame).unwrap();
        assert_eq!(found.len(), 1);

        let det = &found[0];
        let (cx, cy) = det.center();
        assert!((cx - 320.0).abs() < 30.0, "cx = {cx}");
        assert!((cy - 240.0).abs() < 30.0, "cy = {cy}");
        assert_eq!(det.source, DetectorKind::Heuristic);
        assert!(det.confidence <= 0.85 + 1e-6);
        assert!(det.confidence >= 0.5);
        // Expansion makes the box taller than wide and larger than the ellipse.
        assert!(det.height > det.width);
        assert!(det.width > 200.0);
    }

    #[test]
    fn test_box_clamped_to_frame() {
        let frame = with_ellipse(solid(320, 240, [0, 0, 0]), 0, 0, 120, 120, SKIN);
        let det = &detector().detect(&frame).unwrap()[0];
        assert!(det.x >= 0.0 && det.y >= 0.0);
        assert!(det.x + det.width <= 320.0 + 1e-3);
        assert!(det.y + det.height <= 240.0 + 1e-3);
    }

    #[test]
    fn test_isolated_blocks_are_discarded() {
        // Two single-block specks far apart: each cluster is below the minimum size.
        let mut frame = solid(320, 240, [0, 0, 0]);
        for (bx, by) in [(16u32, 16u32), (256, 192)] {
            for y in by..by + 16 {
                for x in bx..bx + 16 {
                    let i = (y * 320 + x) as usize * 3;
                    frame.data[i..i + 3].copy_from_slice(&SKIN);
                }
            }
        }
        assert!(detector().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_largest_cluster_wins() {
        let frame = with_ellipse(solid(640, 480, [0, 0, 0]), 20, 20, 64, 64, SKIN);
        let frame = with_ellipse(frame, 380, 200, 180, 180, SKIN);
        let det = &detector().detect(&frame).unwrap()[0];
        let (cx, cy) = det.center();
        assert!((cx - 470.0).abs() < 30.0, "cx = {cx}");
        assert!((cy - 290.0).abs() < 40.0, "cy = {cy}");
    }

    #[test]
    fn test_confidence_grows_with_cluster_size() {
        let small = with_ellipse(solid(640, 480, [0, 0, 0]), 280, 200, 64, 64, SKIN);
        let large = with_ellipse(solid(640, 480, [0, 0, 0]), 220, 140, 200, 200, SKIN);
        let c_small = detector().detect(&small).unwrap()[0].confidence;
        let c_large = detector().detect(&large).unwrap()[0].confidence;
        assert!(c_large > c_small, "{c_large} <= {c_small}");
    }
}
