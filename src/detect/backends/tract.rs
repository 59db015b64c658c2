#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, LabelMap};
use crate::frame::Frame;
use crate::geometry::BBox;

const CXYWH_OFFSET: usize = 4;

/// Tract-based backend for YOLOv8-style ONNX detection models.
///
/// Expects a single output shaped `[1, 4 + classes, anchors]` with
/// center-format boxes in model input pixels. Frames are letterboxed into the
/// model input (scaled, top-left aligned, zero padded) and boxes are mapped
/// back to frame pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    candidate_threshold: f32,
    iou_threshold: f32,
    labels: LabelMap,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            candidate_threshold: 0.25,
            iou_threshold: 0.45,
            labels: LabelMap::default(),
        })
    }

    /// Minimum class score for a candidate to be reported at all.
    ///
    /// This only prunes noise; the fusion threshold is applied downstream.
    pub fn with_candidate_threshold(mut self, threshold: f32) -> Self {
        self.candidate_threshold = threshold;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    fn letterbox_ratio(&self, frame_width: u32, frame_height: u32) -> f32 {
        (self.width as f32 / frame_width as f32).min(self.height as f32 / frame_height as f32)
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, f32)> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let ratio = self.letterbox_ratio(frame.width(), frame.height());
        let scaled_w = ((frame.width() as f32 * ratio).round() as u32).clamp(1, self.width);
        let scaled_h = ((frame.height() as f32 * ratio).round() as u32).clamp(1, self.height);
        let scaled: RgbImage = imageops::resize(
            frame.image(),
            scaled_w,
            scaled_h,
            imageops::FilterType::Triangle,
        );

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| {
                if (x as u32) < scaled_w && (y as u32) < scaled_h {
                    scaled.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
                } else {
                    0.0
                }
            },
        );

        Ok((input.into_tensor(), ratio))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[1] <= CXYWH_OFFSET {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let classes = shape[1] - CXYWH_OFFSET;
        let anchors = shape[2];
        let frame_w = frame.width() as f32;
        let frame_h = frame.height() as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, confidence) = (0..classes)
                .map(|c| (c, preds[[0, CXYWH_OFFSET + c, a]]))
                .fold((0usize, f32::NEG_INFINITY), |best, x| {
                    if x.1 > best.1 {
                        x
                    } else {
                        best
                    }
                });
            if !confidence.is_finite() || confidence < self.candidate_threshold {
                continue;
            }

            let cx = preds[[0, 0, a]] / ratio;
            let cy = preds[[0, 1, a]] / ratio;
            let w = preds[[0, 2, a]] / ratio;
            let h = preds[[0, 3, a]] / ratio;
            let bbox = BBox::new(
                (cx - w / 2.0).clamp(0.0, frame_w),
                (cy - h / 2.0).clamp(0.0, frame_h),
                (cx + w / 2.0).clamp(0.0, frame_w),
                (cy + h / 2.0).clamp(0.0, frame_h),
            );
            candidates.push(Detection::new(
                bbox,
                confidence.clamp(0.0, 1.0),
                class_id as u32,
            ));
        }

        non_max_suppression(&mut candidates, self.iou_threshold);
        Ok(candidates)
    }
}

/// Greedy NMS, highest confidence first. Keeps survivors in descending order.
fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..xs.len() {
        let overlaps = (0..kept).any(|prev| xs[prev].bbox.iou(&xs[index].bbox) > iou_threshold);
        if !overlaps {
            xs.swap(kept, index);
            kept += 1;
        }
    }
    xs.truncate(kept);
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, ratio, frame)
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(
            vec![0u8; (self.width * self.height * 3) as usize],
            self.width,
            self.height,
            0,
        )?;
        self.detect(&blank).map(|_| ())
    }
}
