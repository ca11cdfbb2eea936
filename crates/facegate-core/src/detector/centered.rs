//! Synthetic centered box, the last resort for best-effort capture.

use crate::types::{Detection, DetectorKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CenteredConfig {
    /// Box width as a fraction of frame width.
    pub width_fraction: f32,
    /// Box height as a fraction of frame height.
    pub height_fraction: f32,
    /// Fixed, deliberately low confidence.
    pub confidence: f32,
}

impl Default for CenteredConfig {
    fn default() -> Self {
        Self {
            width_fraction: 0.45,
            height_fraction: 0.6,
            confidence: 0.72,
        }
    }
}

pub struct CenteredFallback {
    config: CenteredConfig,
}

impl CenteredFallback {
    pub fn new(config: CenteredConfig) -> Self {
        Self { config }
    }

    pub fn place(&self, frame_width: u32, frame_height: u32) -> Detection {
        let w = frame_width as f32 * self.config.width_fraction.clamp(0.0, 1.0);
        let h = frame_height as f32 * self.config.height_fraction.clamp(0.0, 1.0);
        Detection::new(
            (frame_width as f32 - w) / 2.0,
            (frame_height as f32 - h) / 2.0,
            w,
            h,
            self.config.confidence,
            DetectorKind::Centered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_is_centered() {
        let det = CenteredFallback::new(CenteredConfig::default()).place(640, 480);
        let (cx, cy) = det.center();
        assert!((cx - 320.0).abs() < 1e-3);
        assert!((cy - 240.0).abs() < 1e-3);
        assert!((det.width - 288.0).abs() < 1e-3);
        assert!((det.height - 288.0).abs() < 1e-3);
        assert_eq!(det.source, DetectorKind::Centered);
        assert!(det.landmarks.is_none());
    }
}
