//! Captured frames.
//!
//! - `Frame`: owned RGB image plus its position in the capture sequence.
//! - `GrayView`: luminance plane derived on demand for appearance trackers.
//!
//! Frames live for exactly one cycle. Nothing in the loop retains a frame
//! after the cycle that produced it, except what a tracker copies out of it
//! when it is seeded.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

/// Owned RGB frame.
pub struct Frame {
    image: RgbImage,
    /// Zero-based position in the capture sequence.
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, index))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Resize to a display resolution. No-op when already at that size.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.width() == width && self.height() == height {
            return self;
        }
        let image = imageops::resize(&self.image, width, height, imageops::FilterType::Triangle);
        Self {
            image,
            index: self.index,
        }
    }

    pub fn gray(&self) -> GrayView {
        let width = self.width();
        let height = self.height();
        let luma = self
            .image
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
            })
            .collect();
        GrayView {
            luma,
            width,
            height,
        }
    }
}

// ----------------------------------------------------------------------------
// GrayView: luminance plane
// ----------------------------------------------------------------------------

/// Single-channel luminance plane, row-major.
#[derive(Clone, Debug)]
pub struct GrayView {
    luma: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayView {
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.luma[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Copy out a `w`x`h` patch at `(x, y)`. Returns `None` when it does not fit.
    pub fn patch(&self, x: u32, y: u32, w: u32, h: u32) -> Option<Vec<u8>> {
        if w == 0 || h == 0 || x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }
        let mut out = Vec::with_capacity((w * h) as usize);
        for row in y..y + h {
            let start = (row as usize) * (self.width as usize) + x as usize;
            out.extend_from_slice(&self.luma[start..start + w as usize]);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 0).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 3).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.index), (2, 2, 3));
    }

    #[test]
    fn gray_patch_respects_bounds() {
        let mut pixels = vec![0u8; 4 * 4 * 3];
        // pixel (1, 1) is white
        let offset = (4 + 1) * 3;
        pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
        let gray = Frame::from_rgb(pixels, 4, 4, 0).unwrap().gray();

        assert_eq!(gray.at(1, 1), 255);
        assert_eq!(gray.patch(1, 1, 2, 2).unwrap(), vec![255, 0, 0, 0]);
        assert!(gray.patch(3, 3, 2, 2).is_none());
    }

    #[test]
    fn resize_changes_dimensions() {
        let frame = Frame::from_rgb(vec![10u8; 8 * 6 * 3], 8, 6, 0).unwrap();
        let resized = frame.resized(4, 3);
        assert_eq!((resized.width(), resized.height()), (4, 3));
    }
}
