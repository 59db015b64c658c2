//! Synthetic scene for `stub://` sources.
//!
//! A bright square drifts across a dark background along a fixed path, so
//! runs are reproducible and the ground-truth box is known for every frame.

use anyhow::Result;

use crate::frame::Frame;
use crate::geometry::BBox;

const BACKGROUND: u8 = 24;

pub(crate) struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    produced: u64,
}

/// Ground-truth box of the synthetic target in frame `index`.
pub fn synthetic_target(index: u64, width: u32, height: u32) -> BBox {
    let short_side = width.min(height);
    let side = (short_side / 9).max(4).min(short_side) as f32;
    let t = index as f32;
    let cx = width as f32 / 2.0 + (width as f32 / 3.0) * (t * 0.05).sin();
    let cy = height as f32 / 2.0 + (height as f32 / 4.0) * (t * 0.08).sin();
    let x = (cx - side / 2.0).round().clamp(0.0, width as f32 - side);
    let y = (cy - side / 2.0).round().clamp(0.0, height as f32 - side);
    BBox::new(x, y, x + side, y + side)
}

impl SyntheticSource {
    pub(crate) fn new(name: &str, width: u32, height: u32, frame_limit: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            frame_limit,
            produced: 0,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{})",
            self.name,
            self.width,
            self.height
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        self.produced += 1;

        let target = synthetic_target(index, self.width, self.height);
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![BACKGROUND; w * h * 3];
        for y in target.ymin as usize..(target.ymax as usize).min(h) {
            // vertical gradient so the square has texture to lock onto
            let shade = 140 + ((y - target.ymin as usize) * 100 / target.height() as usize) as u8;
            for x in target.xmin as usize..(target.xmax as usize).min(w) {
                let offset = (y * w + x) * 3;
                pixels[offset..offset + 3].copy_from_slice(&[shade, shade, shade / 2]);
            }
        }
        Frame::from_rgb(pixels, self.width, self.height, index).map(Some)
    }
}
