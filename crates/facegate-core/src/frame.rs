//! Frame type and pixel utilities — luminance, cropping, dark detection, CLAHE.

use crate::types::Detection;
use std::time::Instant;

/// BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// A captured RGB frame, owned by the caller for one analysis pass.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap an interleaved RGB8 buffer. Trailing bytes beyond `width * height * 3` are dropped.
    pub fn from_rgb(mut data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        data.truncate(expected);
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
        })
    }

    /// Wrap an interleaved RGBA8 buffer, discarding alpha.
    pub fn from_rgba(data: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let pixels = width as usize * height as usize;
        if data.len() < pixels * 4 {
            return Err(FrameError::InvalidLength {
                expected: pixels * 4,
                actual: data.len(),
            });
        }
        let rgb = data[..pixels * 4]
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        Self::from_rgb(rgb, width, height)
    }

    /// Build a frame from 8-bit grayscale, replicating Y into all three channels.
    pub fn from_gray(gray: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let pixels = width as usize * height as usize;
        if gray.len() < pixels {
            return Err(FrameError::InvalidLength {
                expected: pixels,
                actual: gray.len(),
            });
        }
        let rgb = gray[..pixels].iter().flat_map(|&y| [y, y, y]).collect();
        Self::from_rgb(rgb, width, height)
    }

    /// Convert any decoded image into an RGB frame.
    pub fn from_image(image: &image::DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// True for zero-sized or not-yet-populated frames.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Luminance of one pixel (0.0–255.0).
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let [r, g, b] = self.rgb(x, y);
        luma_of(r, g, b)
    }

    /// Whole-frame luminance plane.
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| luma_of(px[0], px[1], px[2]).round() as u8)
            .collect()
    }

    /// Luminance plane of a sub-region, row-major, `region.width * region.height` bytes.
    pub fn region_luma(&self, region: &Region) -> Vec<u8> {
        let mut out = Vec::with_capacity(region.width as usize * region.height as usize);
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                out.push(self.luma(x, y).round() as u8);
            }
        }
        out
    }
}

#[inline]
pub fn luma_of(r: u8, g: u8, b: u8) -> f32 {
    LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32
}

/// Integer pixel rectangle clipped to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Clip a detection box to the frame. Returns `None` when nothing of the box is inside.
    pub fn from_detection(det: &Detection, frame_width: u32, frame_height: u32) -> Option<Self> {
        if !det.is_valid() {
            return None;
        }
        let x0 = det.x.max(0.0).floor() as u32;
        let y0 = det.y.max(0.0).floor() as u32;
        let x1 = ((det.x + det.width).ceil().max(0.0) as u32).min(frame_width);
        let y1 = ((det.y + det.height).ceil().max(0.0) as u32).min(frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Check if a luminance plane is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Mean and standard deviation of a luminance plane.
pub fn mean_and_stddev(gray: &[u8]) -> (f32, f32) {
    if gray.is_empty() {
        return (0.0, 0.0);
    }
    let n = gray.len() as f32;
    let mean = gray.iter().map(|&b| b as f32).sum::<f32>() / n;
    let variance = gray.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// Per-tile clipped-histogram CDFs, blended bilinearly between tile centres.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h, t) = (width as usize, height as usize, tiles as usize);
    if w == 0 || h == 0 || t == 0 || gray.len() < w * h {
        return;
    }
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            cdfs.push(tile_cdf(gray, w, col * tile_w, row * tile_h, tile_w, tile_h, clip_limit));
        }
    }

    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clipped, redistributed, 0–255 normalized CDF of one tile.
fn tile_cdf(
    gray: &[u8],
    stride: usize,
    x0: usize,
    y0: usize,
    tile_w: usize,
    tile_h: usize,
    clip_limit: f32,
) -> [f32; 256] {
    let tile_pixels = tile_w * tile_h;
    let mut hist = [0u32; 256];
    for y in y0..y0 + tile_h {
        for &p in &gray[y * stride + x0..y * stride + x0 + tile_w] {
            hist[p as usize] += 1;
        }
    }

    let clip = (clip_limit * tile_pixels as f32) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redist = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += redist + u32::from(i < leftover);
    }

    let mut cdf = [0f32; 256];
    let mut acc = 0f32;
    for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
        acc += count as f32;
        *slot = acc;
    }
    let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
    let denom = tile_pixels as f32 - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    }
    cdf
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
