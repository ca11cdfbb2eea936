//! Face alignment to a canonical 112×112 crop.
//!
//! A 4-DOF similarity (scale, rotation, translation) is fitted in closed form
//! from the five detected landmarks to fixed reference positions, then the
//! frame is resampled through its inverse.

use crate::frame::{Frame, Region};
use crate::types::Landmarks;

/// Side of the aligned crop.
pub const ALIGNED_SIZE: usize = 112;

/// Canonical landmark positions inside the 112×112 crop.
const REFERENCE_LANDMARKS: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `dst = [a -b; b a] * src + [tx; ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Degenerate input (all source points coincident) yields `None`.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (s.0 - msx, s.1 - msy);
            let (dx, dy) = (d.0 - mdx, d.1 - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if norm < 1e-9 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    pub fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear RGB sample; coordinates outside the frame read as black.
fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let (w, h) = (frame.width as i64, frame.height as i64);

    let px = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let [r, g, b] = frame.rgb(px as u32, py as u32);
            [r as f32, g as f32, b as f32]
        } else {
            [0.0; 3]
        }
    };

    let (p00, p10, p01, p11) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = p00[c] * (1.0 - fx) * (1.0 - fy)
            + p10[c] * fx * (1.0 - fy)
            + p01[c] * (1.0 - fx) * fy
            + p11[c] * fx * fy;
    }
    out
}

/// Warp the face into a 112×112 interleaved RGB crop using its landmarks.
pub fn align_face(frame: &Frame, landmarks: &Landmarks) -> Option<Vec<u8>> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?;
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = transform.invert((ox as f32, oy as f32))?;
            let rgb = sample_rgb(frame, sx, sy);
            let i = (oy * ALIGNED_SIZE + ox) * 3;
            for c in 0..3 {
                out[i + c] = rgb[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Some(out)
}

/// Resize a face region to a 112×112 RGB crop, for detections without landmarks.
pub fn crop_face(frame: &Frame, region: &Region) -> Vec<u8> {
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
    let sx = region.width as f32 / ALIGNED_SIZE as f32;
    let sy = region.height as f32 / ALIGNED_SIZE as f32;
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let x = region.x as f32 + (ox as f32 + 0.5) * sx - 0.5;
            let y = region.y as f32 + (oy as f32 + 0.5) * sy - 0.5;
            let rgb = sample_rgb(frame, x, y);
            let i = (oy * ALIGNED_SIZE + ox) * 3;
            for c in 0..3 {
                out[i + c] = rgb[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
