//! Detection/tracking fusion.
//!
//! `FusionController` decides once per cycle whether a target exists and
//! where it is. A detection above the confidence threshold always wins and
//! re-seeds the tracker from scratch. Otherwise the tracker coasts on its own
//! prediction until it loses the target or no qualifying detection has been
//! seen for longer than the no-object timeout.
//!
//! A non-empty detection list whose best candidate is at or below the
//! threshold neither refreshes nor expires the detection timestamp. Only an
//! empty list runs the timeout check.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use crate::detect::{best_detection, Detection};
use crate::frame::Frame;
use crate::geometry::BBox;
use crate::track::{TrackerUpdate, VisualTracker};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NO_OBJECT_TIMEOUT: Duration = Duration::from_millis(750);

#[derive(Clone, Debug, PartialEq)]
pub struct FusionConfig {
    /// A detection qualifies when its confidence is strictly above this.
    pub confidence_threshold: f32,
    /// Longest gap without any detection before the target is dropped.
    pub no_object_timeout: Duration,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            no_object_timeout: DEFAULT_NO_OBJECT_TIMEOUT,
        }
    }
}

/// What backs the current target position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    Detection,
    Tracker,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FusionMode {
    Idle,
    Active { bbox: BBox, source: TargetSource },
}

impl FusionMode {
    pub fn bbox(&self) -> Option<BBox> {
        match self {
            FusionMode::Idle => None,
            FusionMode::Active { bbox, .. } => Some(*bbox),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FusionMode::Active { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            FusionMode::Idle => "idle",
            FusionMode::Active {
                source: TargetSource::Detection,
                ..
            } => "detected",
            FusionMode::Active {
                source: TargetSource::Tracker,
                ..
            } => "tracking",
        }
    }
}

/// The controller's belief about the target. One instance per process.
#[derive(Clone, Debug, PartialEq)]
pub struct FusionState {
    mode: FusionMode,
    last_detection: Option<Instant>,
    tracker_initialized: bool,
}

impl FusionState {
    fn new() -> Self {
        Self {
            mode: FusionMode::Idle,
            last_detection: None,
            tracker_initialized: false,
        }
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    pub fn active_bbox(&self) -> Option<BBox> {
        self.mode.bbox()
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_active()
    }

    /// Time of the most recent qualifying detection.
    pub fn last_detection(&self) -> Option<Instant> {
        self.last_detection
    }

    /// True while the tracker holds a usable seed.
    pub fn tracker_initialized(&self) -> bool {
        self.tracker_initialized
    }

    fn go_idle(&mut self) {
        self.mode = FusionMode::Idle;
        self.tracker_initialized = false;
    }
}

/// How the detector's output was interpreted this cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DetectionVerdict {
    /// Best candidate above threshold; tracker re-seeded on it.
    Qualifying(Detection),
    /// Best candidate at or below threshold; no effect on the timestamp.
    Weak(Detection),
    /// Empty list. `timed_out` when the gap exceeded the timeout.
    Absent { timed_out: bool },
}

/// Result of one `FusionController::step`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleOutcome {
    pub verdict: DetectionVerdict,
    /// Tracker answer when the fallback ran this cycle.
    pub tracker: Option<TrackerUpdate>,
    pub mode: FusionMode,
}

pub struct FusionController<T: VisualTracker> {
    config: FusionConfig,
    tracker: T,
    state: FusionState,
}

impl<T: VisualTracker> FusionController<T> {
    pub fn new(config: FusionConfig, tracker: T) -> Self {
        Self {
            config,
            tracker,
            state: FusionState::new(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn state(&self) -> &FusionState {
        &self.state
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Advance the fusion state by one cycle.
    ///
    /// Tracker errors are returned unchanged; a tracker reporting `Lost` is
    /// not an error and demotes the state to `Idle`.
    pub fn step(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        now: Instant,
    ) -> Result<CycleOutcome> {
        let verdict = match best_detection(detections) {
            Some(best) if best.confidence > self.config.confidence_threshold => {
                self.tracker
                    .init(frame, best.bbox.to_rect())
                    .with_context(|| format!("{} tracker init failed", self.tracker.name()))?;
                if !self.state.is_active() {
                    log::debug!(
                        "fusion: target acquired (class {}, confidence {:.2})",
                        best.class_id,
                        best.confidence
                    );
                }
                self.state.mode = FusionMode::Active {
                    bbox: best.bbox,
                    source: TargetSource::Detection,
                };
                self.state.tracker_initialized = true;
                self.state.last_detection = Some(match self.state.last_detection {
                    Some(previous) => previous.max(now),
                    None => now,
                });
                return Ok(CycleOutcome {
                    verdict: DetectionVerdict::Qualifying(*best),
                    tracker: None,
                    mode: self.state.mode,
                });
            }
            Some(best) => DetectionVerdict::Weak(*best),
            None => {
                let timed_out = match self.state.last_detection {
                    Some(last) => {
                        now.saturating_duration_since(last) > self.config.no_object_timeout
                    }
                    None => true,
                };
                if timed_out && self.state.is_active() {
                    log::debug!(
                        "fusion: no detection for over {:?}, target dropped",
                        self.config.no_object_timeout
                    );
                }
                if timed_out {
                    self.state.go_idle();
                }
                DetectionVerdict::Absent { timed_out }
            }
        };

        let tracker = if self.state.tracker_initialized {
            let update = self
                .tracker
                .update(frame)
                .with_context(|| format!("{} tracker update failed", self.tracker.name()))?;
            match update {
                TrackerUpdate::Found(window) => {
                    self.state.mode = FusionMode::Active {
                        bbox: window.to_bbox(),
                        source: TargetSource::Tracker,
                    };
                }
                TrackerUpdate::Lost => {
                    log::debug!("fusion: tracker lost the target");
                    self.state.go_idle();
                }
            }
            Some(update)
        } else {
            None
        };

        Ok(CycleOutcome {
            verdict,
            tracker,
            mode: self.state.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct QueueTracker {
        inits: Vec<Rect>,
        answers: VecDeque<TrackerUpdate>,
    }

    impl VisualTracker for QueueTracker {
        fn name(&self) -> &'static str {
            "queue"
        }

        fn init(&mut self, _frame: &Frame, window: Rect) -> Result<()> {
            self.inits.push(window);
            Ok(())
        }

        fn update(&mut self, _frame: &Frame) -> Result<TrackerUpdate> {
            Ok(self.answers.pop_front().unwrap_or(TrackerUpdate::Lost))
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2, 0).unwrap()
    }

    fn det(confidence: f32) -> Detection {
        Detection::new(BBox::new(100.0, 100.0, 200.0, 200.0), confidence, 0)
    }

    #[test]
    fn qualifying_detection_skips_tracker_update() -> Result<()> {
        let mut tracker = QueueTracker::default();
        tracker
            .answers
            .push_back(TrackerUpdate::Found(Rect::new(0.0, 0.0, 1.0, 1.0)));
        let mut fusion = FusionController::new(FusionConfig::default(), tracker);
        let now = Instant::now();

        let outcome = fusion.step(&frame(), &[det(0.9)], now)?;
        assert_eq!(outcome.tracker, None);
        assert_eq!(fusion.state().last_detection(), Some(now));
        assert_eq!(fusion.tracker().inits, vec![Rect::new(100.0, 100.0, 100.0, 100.0)]);
        assert_eq!(fusion.tracker().answers.len(), 1);
        Ok(())
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        let mut fusion = FusionController::new(FusionConfig::default(), QueueTracker::default());
        let outcome = fusion.step(&frame(), &[det(0.5)], Instant::now())?;
        assert!(matches!(outcome.verdict, DetectionVerdict::Weak(_)));
        assert_eq!(outcome.mode, FusionMode::Idle);
        assert!(fusion.tracker().inits.is_empty());
        Ok(())
    }

    #[test]
    fn weak_detection_does_not_expire_a_stale_target() -> Result<()> {
        let mut tracker = QueueTracker::default();
        let coast = Rect::new(110.0, 100.0, 100.0, 100.0);
        tracker.answers.push_back(TrackerUpdate::Found(coast));
        let mut fusion = FusionController::new(FusionConfig::default(), tracker);
        let t0 = Instant::now();
        fusion.step(&frame(), &[det(0.9)], t0)?;

        // well past the timeout, but the list is non-empty
        let outcome = fusion.step(&frame(), &[det(0.2)], t0 + Duration::from_secs(5))?;
        assert!(matches!(outcome.verdict, DetectionVerdict::Weak(_)));
        assert_eq!(fusion.state().last_detection(), Some(t0));
        assert_eq!(outcome.mode.bbox(), Some(coast.to_bbox()));
        Ok(())
    }

    #[test]
    fn detection_timestamp_never_moves_backwards() -> Result<()> {
        let mut fusion = FusionController::new(FusionConfig::default(), QueueTracker::default());
        let t0 = Instant::now() + Duration::from_secs(1);
        fusion.step(&frame(), &[det(0.9)], t0)?;
        fusion.step(&frame(), &[det(0.9)], t0 - Duration::from_millis(500))?;
        assert_eq!(fusion.state().last_detection(), Some(t0));
        Ok(())
    }
}
