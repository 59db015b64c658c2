//! The follow loop.
//!
//! One thread, one cycle at a time: acquire, detect, fuse, map, transmit,
//! then record the cycle duration. The duration runs from just before the
//! frame is requested to the end of the cycle, including any step-through
//! pause, so the reported rate is the rate of the whole pipeline. The loop ends when the source runs dry,
//! the cycle limit is reached, the shutdown flag is raised or the operator
//! quits a paused still-image run. Any other failure is fatal and carries
//! the cycle number.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::DetectorBackend;
use crate::frame::Frame;
use crate::fusion::{CycleOutcome, DetectionVerdict, FusionController, FusionMode};
use crate::indicator::Indicator;
use crate::ingest::FrameSource;
use crate::mapping::{CoordinateMapper, TargetOffset};
use crate::rate::{FrameRateEstimator, DEFAULT_RATE_WINDOW};
use crate::serial::SerialLink;
use crate::track::VisualTracker;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
    /// Wait for Enter after each still image; `q` quits.
    pub step_through: bool,
    pub health_interval: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_cycles: None,
            step_through: false,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    CycleLimit,
    Shutdown,
    UserQuit,
}

/// What one cycle did.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub detections: usize,
    pub outcome: CycleOutcome,
    /// Class label of the detection that seeded the tracker, if one did.
    pub target_label: Option<String>,
    pub offset: Option<TargetOffset>,
    /// Bytes written to the serial link, when a command was sent.
    pub bytes_sent: Option<usize>,
    /// 1 while a target is held, else 0.
    pub object_count: u32,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub cycles: u64,
    pub cycles_with_target: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub average_fps: f64,
    pub reason: StopReason,
}

pub struct FollowLoop<T: VisualTracker, W: Write> {
    detector: Box<dyn DetectorBackend>,
    fusion: FusionController<T>,
    mapper: CoordinateMapper,
    link: SerialLink<W>,
    rate: FrameRateEstimator,
    cycles: u64,
    cycles_with_target: u64,
}

impl<T: VisualTracker, W: Write> FollowLoop<T, W> {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        fusion: FusionController<T>,
        mapper: CoordinateMapper,
        link: SerialLink<W>,
    ) -> Self {
        Self {
            detector,
            fusion,
            mapper,
            link,
            rate: FrameRateEstimator::new(DEFAULT_RATE_WINDOW),
            cycles: 0,
            cycles_with_target: 0,
        }
    }

    pub fn fusion(&self) -> &FusionController<T> {
        &self.fusion
    }

    pub fn link(&self) -> &SerialLink<W> {
        &self.link
    }

    pub fn average_fps(&self) -> f64 {
        self.rate.average()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle on an already acquired frame.
    ///
    /// The caller owns the cycle timing; see `record_cycle_time`.
    pub fn run_cycle(&mut self, frame: &Frame, now: Instant) -> Result<CycleReport> {
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("{} detector failed", self.detector.name()))?;
        let was_active = self.fusion.state().is_active();
        let outcome = self.fusion.step(frame, &detections, now)?;
        let target_label = match &outcome.verdict {
            DetectionVerdict::Qualifying(best) => {
                let label = self.detector.labels().label(best.class_id);
                if !was_active {
                    log::info!("target acquired: {} ({:.2})", label, best.confidence);
                }
                Some(label)
            }
            _ => None,
        };
        let offset = self.mapper.map(&outcome.mode);
        let bytes_sent = self
            .link
            .transmit(offset.as_ref())
            .context("serial transmission failed")?;

        self.cycles += 1;
        let object_count = u32::from(outcome.mode.is_active());
        if object_count > 0 {
            self.cycles_with_target += 1;
        }

        Ok(CycleReport {
            cycle: self.cycles,
            detections: detections.len(),
            outcome,
            target_label,
            offset,
            bytes_sent,
            object_count,
        })
    }

    /// Feed one full cycle duration, acquisition included, to the rate window.
    pub fn record_cycle_time(&mut self, elapsed: Duration) {
        self.rate.record(elapsed);
    }

    /// Drive the loop from `source` until it stops. Reads step-through
    /// keystrokes from stdin.
    pub fn run(
        &mut self,
        source: &mut FrameSource,
        indicator: &mut dyn Indicator,
        shutdown: &AtomicBool,
        options: &LoopOptions,
    ) -> Result<RunSummary> {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        self.run_with_input(source, indicator, shutdown, options, &mut input)
    }

    /// Like `run`, with step-through keystrokes read from `input`.
    ///
    /// The indicator is switched on before the first cycle and off again on
    /// every exit path, including faults.
    pub fn run_with_input(
        &mut self,
        source: &mut FrameSource,
        indicator: &mut dyn Indicator,
        shutdown: &AtomicBool,
        options: &LoopOptions,
        input: &mut dyn BufRead,
    ) -> Result<RunSummary> {
        indicator.activate().context("failed to activate indicator")?;
        let result = self.drive(source, shutdown, options, input);
        let deactivated = indicator.deactivate();
        match (result, deactivated) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(err)) => Err(err.context("failed to deactivate indicator")),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(off_err)) => {
                log::error!("failed to deactivate indicator: {:#}", off_err);
                Err(err)
            }
        }
    }

    fn drive(
        &mut self,
        source: &mut FrameSource,
        shutdown: &AtomicBool,
        options: &LoopOptions,
        input: &mut dyn BufRead,
    ) -> Result<RunSummary> {
        let pause_between_frames = options.step_through && source.descriptor().is_still();
        let mut last_health_log = Instant::now();

        let reason = loop {
            if shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested, stopping follow loop");
                break StopReason::Shutdown;
            }
            if options.max_cycles.is_some_and(|limit| self.cycles >= limit) {
                break StopReason::CycleLimit;
            }

            let cycle = self.cycles + 1;
            let cycle_started = Instant::now();
            let frame = source
                .next_frame()
                .with_context(|| format!("cycle {}: frame acquisition failed", cycle))?;
            let Some(frame) = frame else {
                log::info!("all frames from {} have been processed", source.descriptor());
                break StopReason::SourceExhausted;
            };

            let report = self
                .run_cycle(&frame, Instant::now())
                .with_context(|| format!("cycle {}", cycle))?;
            log::trace!(
                "cycle {}: {} detections, mode={}, offset={:?}",
                report.cycle,
                report.detections,
                report.outcome.mode.label(),
                report.offset
            );

            if last_health_log.elapsed() >= options.health_interval {
                self.log_health(&report.outcome.mode);
                last_health_log = Instant::now();
            }

            let keep_going = !pause_between_frames || wait_for_operator(input)?;
            self.record_cycle_time(cycle_started.elapsed());
            if !keep_going {
                break StopReason::UserQuit;
            }
        };

        let summary = RunSummary {
            cycles: self.cycles,
            cycles_with_target: self.cycles_with_target,
            messages_sent: self.link.messages_sent(),
            bytes_sent: self.link.bytes_sent(),
            average_fps: self.rate.average(),
            reason,
        };
        log::info!(
            "follow loop stopped ({:?}) after {} cycles, {} with a target, {} commands sent",
            summary.reason,
            summary.cycles,
            summary.cycles_with_target,
            summary.messages_sent
        );
        Ok(summary)
    }

    fn log_health(&self, mode: &FusionMode) {
        log::info!(
            "follow health: cycles={} fps={:.2} mode={} commands={} detector={}",
            self.cycles,
            self.rate.average(),
            mode.label(),
            self.link.messages_sent(),
            self.detector.name()
        );
    }

    /// Flush and hand back the serial sink.
    pub fn close(self) -> Result<W> {
        self.link.close()
    }
}

/// Block until the operator presses Enter. Returns false on `q` or EOF.
fn wait_for_operator(input: &mut dyn BufRead) -> Result<bool> {
    log::info!("press Enter for the next image, or q then Enter to quit");
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("failed to read operator input")?;
    Ok(read > 0 && !line.trim().eq_ignore_ascii_case("q"))
}
