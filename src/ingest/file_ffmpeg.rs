//! Video file frame source using FFmpeg.
//!
//! Decodes the best video stream to RGB24 in memory. The end of the file is
//! the end of the stream, not an error.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
    frame_count: u64,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
            frame_count: 0,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("VideoSource: opened {} (ffmpeg)", self.path.display());
        Ok(())
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded, index).map(Some);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded, index).map(Some);
            }
        }

        if !self.flushed {
            self.flushed = true;
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded, index).map(Some);
        }

        log::info!(
            "VideoSource: reached end of {} after {} frames",
            self.path.display(),
            self.frame_count
        );
        Ok(None)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video, index: u64) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, index)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
