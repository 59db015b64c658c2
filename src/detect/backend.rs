use anyhow::Result;

use super::result::{Detection, LabelMap};
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends are stateless per call from the loop's point of view: every
/// `detect` returns a fresh candidate list for the given frame, with
/// confidences in `[0, 1]` and class ids resolvable through `labels`.
/// Internal inference failures are returned as errors and end the loop.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Label table for this backend's class ids.
    fn labels(&self) -> &LabelMap;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
