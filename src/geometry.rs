//! Pixel-space boxes.
//!
//! Detectors report corners (`BBox`), trackers are seeded and answer with
//! top-left origin windows (`Rect`). Both use floating point pixels with the
//! origin at the top-left of the frame.

use serde::{Deserialize, Serialize};

/// Bounding box given by its corners `(xmin, ymin, xmax, ymax)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Window given by its top-left corner and size `(x, y, width, height)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Center point `((xmin + xmax) / 2, (ymin + ymax) / 2)`.
    pub fn midpoint(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    pub fn to_rect(&self) -> Rect {
        Rect {
            x: self.xmin,
            y: self.ymin,
            width: self.width(),
            height: self.height(),
        }
    }
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn to_bbox(&self) -> BBox {
        BBox {
            xmin: self.x,
            ymin: self.y,
            xmax: self.x + self.width,
            ymax: self.y + self.height,
        }
    }
}

impl From<Rect> for BBox {
    fn from(rect: Rect) -> Self {
        rect.to_bbox()
    }
}

impl From<BBox> for Rect {
    fn from(bbox: BBox) -> Self {
        bbox.to_rect()
    }
}
