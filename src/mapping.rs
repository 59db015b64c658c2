//! Bounding box to actuator offset.

use crate::fusion::FusionMode;
use crate::geometry::BBox;

/// Expected display resolution the actuator is calibrated against.
pub const DEFAULT_REFERENCE_WIDTH: u32 = 1280;
pub const DEFAULT_REFERENCE_HEIGHT: u32 = 720;

/// Target position relative to the reference center, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetOffset {
    pub dx: f32,
    pub dy: f32,
}

/// Maps boxes to offsets from a fixed reference center.
///
/// The center comes from configuration, never from the live frame, so the
/// actuator sees the same geometry whatever the capture resolution is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    cx: f32,
    cy: f32,
}

impl CoordinateMapper {
    pub fn new(cx: f32, cy: f32) -> Self {
        Self { cx, cy }
    }

    /// Center at half of the given resolution, e.g. `(640, 360)` for 1280x720.
    pub fn for_resolution(width: u32, height: u32) -> Self {
        Self::new(width as f32 / 2.0, height as f32 / 2.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.cx, self.cy)
    }

    pub fn offset(&self, bbox: &BBox) -> TargetOffset {
        let (mx, my) = bbox.midpoint();
        TargetOffset {
            dx: mx - self.cx,
            dy: my - self.cy,
        }
    }

    /// `None` while idle.
    pub fn map(&self, mode: &FusionMode) -> Option<TargetOffset> {
        mode.bbox().map(|bbox| self.offset(&bbox))
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::for_resolution(DEFAULT_REFERENCE_WIDTH, DEFAULT_REFERENCE_HEIGHT)
    }
}
