use tracing::{debug, warn};

use crate::PageCanvas;

/// Owns the global render scale. Changing it invalidates every page's base
/// bitmap; overlays keep their pixels and are never rescaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomController {
    scale: f32,
    min_scale: f32,
    max_scale: f32,
}

impl ZoomController {
    pub fn new(initial: f32, min_scale: f32, max_scale: f32) -> Self {
        let min_scale = if min_scale.is_finite() && min_scale > 0.0 {
            min_scale
        } else {
            f32::MIN_POSITIVE
        };
        let max_scale = if max_scale.is_finite() && max_scale >= min_scale {
            max_scale
        } else {
            min_scale.max(1.0)
        };
        let initial = if initial.is_finite() { initial } else { 1.0 };
        Self {
            scale: initial.clamp(min_scale, max_scale),
            min_scale,
            max_scale,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Multiplies the scale, clamped to the configured bounds, and invalidates
    /// all pages when it actually changed. Returns whether it changed.
    pub fn apply_zoom(&mut self, multiplier: f32, pages: &mut [PageCanvas]) -> bool {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            warn!(multiplier, "ignoring invalid zoom multiplier");
            return false;
        }
        let next = (self.scale * multiplier).clamp(self.min_scale, self.max_scale);
        if (next - self.scale).abs() <= f32::EPSILON {
            debug!(scale = self.scale, "zoom already at bound");
            return false;
        }
        self.scale = next;
        let mut invalidated = 0;
        for page in pages.iter_mut() {
            if page.invalidate() {
                invalidated += 1;
            }
        }
        debug!(scale = self.scale, invalidated, "zoom changed");
        true
    }
}

impl Default for ZoomController {
    fn default() -> Self {
        Self::new(2.0, 0.25, 8.0)
    }
}
