use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::geometry::BBox;

/// One candidate from a detector pass.
///
/// Produced fresh every cycle and never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Corners in frame pixels.
    pub bbox: BBox,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Highest-confidence detection. Ties keep the first one encountered.
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best, candidate| match best {
        Some(current) if candidate.confidence <= current.confidence => Some(current),
        _ => Some(candidate),
    })
}

/// Class id to label lookup.
#[derive(Clone, Debug, Default)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Load one label per line. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        Ok(Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    pub fn label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
