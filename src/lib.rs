//! Target Follow
//!
//! Closes a perception-to-actuation loop: every frame goes through an object
//! detector, a short-term visual tracker stands in when detections go missing
//! or weak, and the resulting target position is streamed as a frame-centered
//! offset over a serial link to a pan/tilt actuator.
//!
//! # Architecture
//!
//! The loop is strictly single-threaded. Each cycle runs to completion before
//! the next begins:
//!
//! 1. `ingest`: acquire a frame (stills, folders, video, USB camera, synthetic)
//! 2. `detect`: run the detector backend
//! 3. `fusion`: decide whether a target exists and where, re-seeding or
//!    consulting the `track` tracker
//! 4. `mapping`: convert the target box to an offset from the reference center
//! 5. `serial`: transmit `&dx,dy#\r\n` when, and only when, a target is held
//! 6. `rate`: record the cycle duration for the running FPS average
//!
//! `runtime::FollowLoop` wires the stages together; `config` loads the layered
//! daemon configuration.

pub mod config;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod geometry;
pub mod indicator;
pub mod ingest;
pub mod mapping;
pub mod rate;
pub mod runtime;
pub mod serial;
pub mod track;

pub use config::{ConfigOverrides, FollowConfig};
pub use detect::{BackendRegistry, Detection, DetectorBackend, LabelMap, ScriptedBackend};
pub use frame::Frame;
pub use fusion::{
    CycleOutcome, DetectionVerdict, FusionConfig, FusionController, FusionMode, FusionState,
    TargetSource,
};
pub use geometry::{BBox, Rect};
pub use indicator::{Indicator, NullIndicator, SysfsGpioIndicator};
pub use ingest::{FrameSource, SourceDescriptor, SourceSettings};
pub use mapping::{CoordinateMapper, TargetOffset};
pub use rate::FrameRateEstimator;
pub use runtime::{CycleReport, FollowLoop, LoopOptions, RunSummary, StopReason};
pub use serial::{format_command, parse_command, SerialLink};
pub use track::{TemplateTracker, TemplateTrackerConfig, TrackerUpdate, VisualTracker};
