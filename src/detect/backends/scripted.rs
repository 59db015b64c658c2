use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, LabelMap};
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    labels: Vec<String>,
    frames: Vec<Vec<Detection>>,
    #[serde(default)]
    repeat: bool,
}

/// Replays a fixed detection sequence, one entry per frame index.
///
/// Frames past the end of the script see no detections unless the script
/// repeats. Used for synthetic runs and for exercising the fusion loop
/// without a model.
pub struct ScriptedBackend {
    frames: Vec<Vec<Detection>>,
    labels: LabelMap,
    repeat: bool,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames,
            labels: LabelMap::default(),
            repeat: false,
        }
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Load a JSON script: `{"labels": [...], "frames": [[detection, ...], ...], "repeat": false}`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let script: ScriptFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        for (index, frame) in script.frames.iter().enumerate() {
            if let Some(bad) = frame
                .iter()
                .find(|d| !(0.0..=1.0).contains(&d.confidence))
            {
                return Err(anyhow!(
                    "detection script frame {} has confidence {} outside [0, 1]",
                    index,
                    bad.confidence
                ));
            }
        }
        Ok(Self {
            frames: script.frames,
            labels: LabelMap::new(script.labels),
            repeat: script.repeat,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let mut index = frame.index as usize;
        if self.repeat {
            index %= self.frames.len();
        }
        Ok(self.frames.get(index).cloned().unwrap_or_default())
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use std::io::Write;

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2, index).unwrap()
    }

    #[test]
    fn replays_by_frame_index() -> Result<()> {
        let hit = Detection::new(BBox::new(1.0, 2.0, 3.0, 4.0), 0.8, 0);
        let mut backend = ScriptedBackend::new(vec![vec![hit], vec![]]);

        assert_eq!(backend.detect(&frame(0))?, vec![hit]);
        assert!(backend.detect(&frame(1))?.is_empty());
        assert!(backend.detect(&frame(5))?.is_empty());

        let mut backend = backend.repeating(true);
        assert_eq!(backend.detect(&frame(2))?, vec![hit]);
        Ok(())
    }

    #[test]
    fn loads_script_and_rejects_bad_confidence() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"labels": ["drone"], "frames": [[{{"bbox": {{"xmin": 1, "ymin": 2, "xmax": 3, "ymax": 4}}, "confidence": 0.7, "class_id": 0}}]]}}"#
        )?;
        let backend = ScriptedBackend::load(file.path())?;
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.labels().label(0), "drone");

        let mut bad = tempfile::NamedTempFile::new()?;
        write!(
            bad,
            r#"{{"frames": [[{{"bbox": {{"xmin": 1, "ymin": 2, "xmax": 3, "ymax": 4}}, "confidence": 1.5, "class_id": 0}}]]}}"#
        )?;
        assert!(ScriptedBackend::load(bad.path()).is_err());
        Ok(())
    }
}
