//! Tracker boundary.
//!
//! A short-term visual tracker is seeded on a region and then asked, frame by
//! frame, where that region went. It knows nothing about object identity
//! beyond appearance, and every `init` discards whatever it learned before.

mod template;

pub use template::{TemplateTracker, TemplateTrackerConfig};

use anyhow::Result;

use crate::frame::Frame;
use crate::geometry::Rect;

/// Outcome of a tracker update: the `(success, bbox)` contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackerUpdate {
    Found(Rect),
    Lost,
}

/// Short-term single-target visual tracker.
pub trait VisualTracker {
    fn name(&self) -> &'static str;

    /// Re-seed on `window` (top-left origin, pixels). Always a full reset.
    fn init(&mut self, frame: &Frame, window: Rect) -> Result<()>;

    /// Predict the seeded region's location in `frame`.
    fn update(&mut self, frame: &Frame) -> Result<TrackerUpdate>;
}

impl<T: VisualTracker + ?Sized> VisualTracker for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn init(&mut self, frame: &Frame, window: Rect) -> Result<()> {
        (**self).init(frame, window)
    }

    fn update(&mut self, frame: &Frame) -> Result<TrackerUpdate> {
        (**self).update(frame)
    }
}
