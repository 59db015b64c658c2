use anyhow::Result;

use super::{TrackerUpdate, VisualTracker};
use crate::frame::{Frame, GrayView};
use crate::geometry::Rect;

/// Tuning for `TemplateTracker`.
#[derive(Clone, Debug)]
pub struct TemplateTrackerConfig {
    /// Pixels searched on each side of the last known position.
    pub search_margin: u32,
    /// Coarse search step in pixels; the best coarse hit is refined at 1px.
    pub search_step: u32,
    /// Largest acceptable mean absolute luminance difference (0..255).
    pub max_mean_difference: f32,
    /// Upper bound on sampled template pixels per axis.
    pub max_samples_per_axis: u32,
}

impl Default for TemplateTrackerConfig {
    fn default() -> Self {
        Self {
            search_margin: 32,
            search_step: 2,
            max_mean_difference: 40.0,
            max_samples_per_axis: 32,
        }
    }
}

struct Template {
    luma: Vec<u8>,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
}

/// Appearance tracker matching a fixed luminance template.
///
/// `init` copies the seeded window out of the frame; `update` scans a window
/// around the previous position for the lowest mean absolute difference and
/// reports `Lost` once that difference exceeds the configured limit. A lost
/// tracker stays lost until it is seeded again.
pub struct TemplateTracker {
    config: TemplateTrackerConfig,
    template: Option<Template>,
}

impl TemplateTracker {
    pub fn new(config: TemplateTrackerConfig) -> Self {
        Self {
            config,
            template: None,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.template.is_some()
    }

    fn sample_stride(&self, len: u32) -> u32 {
        (len / self.config.max_samples_per_axis.max(1)).max(1)
    }

    /// Mean absolute difference of the template placed at `(x, y)`, or `None`
    /// when it already exceeds `bound`.
    fn score(
        &self,
        template: &Template,
        gray: &GrayView,
        x: u32,
        y: u32,
        bound: f32,
    ) -> Option<f32> {
        let sx = self.sample_stride(template.width);
        let sy = self.sample_stride(template.height);
        let samples_x = template.width.div_ceil(sx);
        let samples_y = template.height.div_ceil(sy);
        let count = (samples_x * samples_y) as f32;
        let budget = bound * count;

        let mut total = 0u64;
        let mut ty = 0;
        while ty < template.height {
            let mut tx = 0;
            while tx < template.width {
                let expected = template.luma[(ty * template.width + tx) as usize];
                let actual = gray.at(x + tx, y + ty);
                total += expected.abs_diff(actual) as u64;
                tx += sx;
            }
            if total as f32 > budget {
                return None;
            }
            ty += sy;
        }
        Some(total as f32 / count)
    }

    fn search(
        &self,
        template: &Template,
        gray: &GrayView,
        xs: (u32, u32),
        ys: (u32, u32),
        step: u32,
        mut best: (f32, u32, u32),
    ) -> (f32, u32, u32) {
        let mut y = ys.0;
        while y <= ys.1 {
            let mut x = xs.0;
            while x <= xs.1 {
                if let Some(score) = self.score(template, gray, x, y, best.0) {
                    if score < best.0 {
                        best = (score, x, y);
                    }
                }
                x += step;
            }
            y += step;
        }
        best
    }
}

impl Default for TemplateTracker {
    fn default() -> Self {
        Self::new(TemplateTrackerConfig::default())
    }
}

impl VisualTracker for TemplateTracker {
    fn name(&self) -> &'static str {
        "template"
    }

    fn init(&mut self, frame: &Frame, window: Rect) -> Result<()> {
        self.template = None;

        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;
        let x0 = window.x.round().clamp(0.0, max_x) as u32;
        let y0 = window.y.round().clamp(0.0, max_y) as u32;
        let x1 = (window.x + window.width).round().clamp(0.0, max_x) as u32;
        let y1 = (window.y + window.height).round().clamp(0.0, max_y) as u32;
        if x1 <= x0 + 1 || y1 <= y0 + 1 {
            log::debug!("template tracker: degenerate seed window {:?}", window);
            return Ok(());
        }

        let gray = frame.gray();
        let (width, height) = (x1 - x0, y1 - y0);
        if let Some(luma) = gray.patch(x0, y0, width, height) {
            self.template = Some(Template {
                luma,
                width,
                height,
                x: x0,
                y: y0,
            });
        }
        Ok(())
    }

    fn update(&mut self, frame: &Frame) -> Result<TrackerUpdate> {
        let Some(template) = self.template.as_ref() else {
            return Ok(TrackerUpdate::Lost);
        };
        if template.width > frame.width() || template.height > frame.height() {
            self.template = None;
            return Ok(TrackerUpdate::Lost);
        }

        let gray = frame.gray();
        let margin = self.config.search_margin;
        let max_x = frame.width() - template.width;
        let max_y = frame.height() - template.height;
        let xs = (
            template.x.saturating_sub(margin).min(max_x),
            (template.x + margin).min(max_x),
        );
        let ys = (
            template.y.saturating_sub(margin).min(max_y),
            (template.y + margin).min(max_y),
        );

        let limit = self.config.max_mean_difference;
        let step = self.config.search_step.max(1);
        let start = (f32::INFINITY, template.x, template.y);
        let mut best = self.search(template, &gray, xs, ys, step, start);
        if step > 1 && best.0.is_finite() {
            let refine_x = (
                best.1.saturating_sub(step - 1).max(xs.0),
                (best.1 + step - 1).min(xs.1),
            );
            let refine_y = (
                best.2.saturating_sub(step - 1).max(ys.0),
                (best.2 + step - 1).min(ys.1),
            );
            best = self.search(template, &gray, refine_x, refine_y, 1, best);
        }

        let (score, x, y) = best;
        if score > limit {
            log::debug!("template tracker: lost (best mean difference {:.1})", score);
            self.template = None;
            return Ok(TrackerUpdate::Lost);
        }

        let (width, height) = (template.width, template.height);
        if let Some(template) = self.template.as_mut() {
            template.x = x;
            template.y = y;
        }
        Ok(TrackerUpdate::Found(Rect::new(
            x as f32,
            y as f32,
            width as f32,
            height as f32,
        )))
    }
}
