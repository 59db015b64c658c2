//! V4L2 frame source for USB cameras.
//!
//! `usbN` maps to `/dev/videoN`. The device is asked for RGB24 at the
//! configured resolution; when it refuses, whatever format it keeps must
//! still be RGB24 or the connection fails. A capture error after connecting
//! is treated as a disconnected camera and ends the stream.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate; 0 keeps the device default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl V4l2Config {
    pub fn for_index(index: u32, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device: format!("/dev/video{}", index),
            target_fps,
            width,
            height,
        }
    }
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

impl V4l2Source {
    pub(crate) fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(anyhow!(
                "v4l2 device {} does not deliver RGB24 (got {})",
                self.config.device,
                format.fourcc
            ));
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let pixels = match captured {
            Ok(pixels) => pixels,
            Err(err) => {
                log::warn!(
                    "V4l2Source: unable to read frames from {} ({}); camera disconnected?",
                    self.config.device,
                    err
                );
                self.state = None;
                return Ok(None);
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let expected = (self.active_width * self.active_height * 3) as usize;
        let pixels = if pixels.len() > expected {
            pixels[..expected].to_vec()
        } else {
            pixels
        };
        Frame::from_rgb(pixels, self.active_width, self.active_height, index).map(Some)
    }

    #[cfg(test)]
    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_index_maps_to_video_device() {
        let config = V4l2Config::for_index(2, 1280, 720, 30);
        assert_eq!(config.device, "/dev/video2");
        assert_eq!((config.width, config.height, config.target_fps), (1280, 720, 30));
    }

    #[test]
    fn next_frame_requires_connect() {
        let mut source = V4l2Source::new(V4l2Config::for_index(0, 640, 480, 0));
        assert!(source.next_frame(0).is_err());
        assert_eq!(source.frames_captured(), 0);
    }
}
