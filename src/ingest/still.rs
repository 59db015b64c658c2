//! Still image frame source.
//!
//! Serves a single image or every image directly inside a folder, once each,
//! in file name order. Unreadable images are skipped with a warning.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::descriptor::IMAGE_EXTENSIONS;
use crate::frame::Frame;

pub(crate) struct StillSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl StillSource {
    pub(crate) fn image(path: &Path) -> Self {
        Self {
            paths: vec![path.to_path_buf()],
            next: 0,
        }
    }

    pub(crate) fn folder(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to list image folder {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self { paths, next: 0 })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("StillSource: {} image(s) queued", self.paths.len());
        Ok(())
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        while let Some(path) = self.paths.get(self.next) {
            self.next += 1;
            match image::open(path) {
                Ok(image) => return Ok(Some(Frame::new(image.to_rgb8(), index))),
                Err(err) => log::warn!("StillSource: skipping {}: {}", path.display(), err),
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize {
        self.paths.len() - self.next
    }
}
