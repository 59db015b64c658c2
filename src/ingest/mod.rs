//! Frame acquisition.
//!
//! This module provides the sources the follow loop can read from:
//! - Still images and image folders
//! - Synthetic scenes (`stub://`, testing and demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! Every source yields `Frame`s through `FrameSource::next_frame`. `Ok(None)`
//! means the source is done: a finite source ran out, or a live camera
//! stopped delivering. Both end the loop cleanly.

mod descriptor;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod still;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use descriptor::{SourceDescriptor, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
pub use synthetic::synthetic_target;

use anyhow::Result;

use crate::frame::Frame;
#[cfg(feature = "ingest-file-ffmpeg")]
use file_ffmpeg::FfmpegFileSource;
use still::StillSource;
use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
use v4l2::{V4l2Config, V4l2Source};

pub const DEFAULT_SYNTHETIC_WIDTH: u32 = 1280;
pub const DEFAULT_SYNTHETIC_HEIGHT: u32 = 720;

/// Acquisition options that are not part of the source string.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// Resize every frame to this `(width, height)`.
    pub resolution: Option<(u32, u32)>,
    /// Requested camera frame rate; 0 keeps the device default.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            resolution: None,
            target_fps: 0,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub struct FrameSource {
    descriptor: SourceDescriptor,
    backend: SourceBackend,
    resolution: Option<(u32, u32)>,
    frames_captured: u64,
}

enum SourceBackend {
    Still(StillSource),
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Video(FfmpegFileSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Source),
}

impl FrameSource {
    pub fn open(descriptor: &SourceDescriptor, settings: &SourceSettings) -> Result<Self> {
        descriptor.ensure_supported()?;
        let backend = match descriptor {
            SourceDescriptor::Image(path) => SourceBackend::Still(StillSource::image(path)),
            SourceDescriptor::Folder(dir) => SourceBackend::Still(StillSource::folder(dir)?),
            SourceDescriptor::Synthetic { name, frames } => {
                let (width, height) = settings
                    .resolution
                    .unwrap_or((DEFAULT_SYNTHETIC_WIDTH, DEFAULT_SYNTHETIC_HEIGHT));
                SourceBackend::Synthetic(SyntheticSource::new(name, width, height, *frames))
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceDescriptor::Video(path) => SourceBackend::Video(FfmpegFileSource::new(path)?),
            #[cfg(feature = "ingest-v4l2")]
            SourceDescriptor::Usb(index) => {
                let (width, height) = settings.resolution.unwrap_or((640, 480));
                SourceBackend::V4l2(V4l2Source::new(V4l2Config::for_index(
                    *index,
                    width,
                    height,
                    settings.target_fps,
                )))
            }
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("source {} cannot be opened in this build", other),
        };
        Ok(Self {
            descriptor: descriptor.clone(),
            backend,
            resolution: settings.resolution,
            frames_captured: 0,
        })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Still(source) => source.connect(),
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::Video(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::V4l2(source) => source.connect(),
        }
    }

    /// Capture the next frame, resized to the configured resolution.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let index = self.frames_captured;
        let frame = match &mut self.backend {
            SourceBackend::Still(source) => source.next_frame(index)?,
            SourceBackend::Synthetic(source) => source.next_frame(index)?,
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::Video(source) => source.next_frame(index)?,
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::V4l2(source) => source.next_frame(index)?,
        };
        let Some(frame) = frame else {
            return Ok(None);
        };
        self.frames_captured += 1;
        Ok(Some(match self.resolution {
            Some((width, height)) => frame.resized(width, height),
            None => frame,
        }))
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.descriptor.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_honours_resolution_and_limit() -> Result<()> {
        let descriptor = SourceDescriptor::parse("stub://unit?frames=3")?;
        let settings = SourceSettings {
            resolution: Some((160, 120)),
            ..SourceSettings::default()
        };
        let mut source = FrameSource::open(&descriptor, &settings)?;
        source.connect()?;

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (160, 120));
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.stats().frames_captured, 3);
        assert_eq!(source.stats().source, "stub://unit");
        Ok(())
    }

    #[test]
    fn synthetic_source_accepts_resolutions_below_the_target_size() -> Result<()> {
        let descriptor = SourceDescriptor::parse("stub://tiny?frames=1")?;
        let settings = SourceSettings {
            resolution: Some((2, 2)),
            ..SourceSettings::default()
        };
        let mut source = FrameSource::open(&descriptor, &settings)?;
        source.connect()?;
        let frame = source.next_frame()?.expect("one frame");
        assert_eq!((frame.width(), frame.height()), (2, 2));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn still_images_are_resized_to_display_resolution() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.png");
        image::RgbImage::new(32, 16).save(&path)?;

        let descriptor = SourceDescriptor::parse(path.to_str().unwrap())?;
        let settings = SourceSettings {
            resolution: Some((64, 32)),
            ..SourceSettings::default()
        };
        let mut source = FrameSource::open(&descriptor, &settings)?;
        source.connect()?;
        let frame = source.next_frame()?.expect("one frame");
        assert_eq!((frame.width(), frame.height()), (64, 32));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }
}
