//! followd - detection/tracking follow daemon
//!
//! This daemon:
//! 1. Loads layered configuration (defaults, FOLLOW_CONFIG file, FOLLOW_* env, CLI)
//! 2. Opens the frame source, detector backend and serial link once
//! 3. Runs the follow loop until the source ends, Ctrl-C or a fatal fault
//! 4. Tears down the indicator and serial link on every exit path

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use target_follow::config::{DetectorSettings, BACKEND_SCRIPTED};
use target_follow::{
    BackendRegistry, ConfigOverrides, CoordinateMapper, DetectorBackend, FollowConfig, FollowLoop,
    FrameSource, FusionController, Indicator, LabelMap, LoopOptions, NullIndicator,
    ScriptedBackend, SerialLink, SourceSettings, SysfsGpioIndicator, TemplateTracker,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detector model file (e.g. "runs/detect/train/weights/best.onnx").
    #[arg(long)]
    model: Option<PathBuf>,
    /// Image source: image file, image folder, video file, usbN, picameraN or stub://name.
    #[arg(long)]
    source: Option<String>,
    /// Minimum confidence a detection must exceed to be trusted.
    #[arg(long)]
    thresh: Option<f32>,
    /// Resolution in WxH to resize frames to (e.g. "1280x720").
    #[arg(long)]
    resolution: Option<String>,
    /// Request recording (needs a video or camera source and --resolution).
    #[arg(long)]
    record: bool,
    /// Detector backend: tract or scripted.
    #[arg(long)]
    backend: Option<String>,
    /// Detection script for the scripted backend.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Newline-separated class labels.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Serial device connected to the actuator.
    #[arg(long)]
    serial_port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// GPIO line for the running indicator (the reference rig uses 26).
    #[arg(long)]
    gpio_pin: Option<u32>,
    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Wait for Enter between still images (q quits).
    #[arg(long)]
    step: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source: self.source.clone(),
            model_path: self.model.clone(),
            labels_path: self.labels.clone(),
            script_path: self.script.clone(),
            backend: self.backend.clone(),
            threshold: self.thresh,
            resolution: self.resolution.clone(),
            record: self.record,
            serial_port: self.serial_port.clone(),
            baud_rate: self.baud,
            gpio_pin: self.gpio_pin,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = FollowConfig::load(&args.overrides())?;
    let descriptor = cfg.source_descriptor()?;
    if cfg.display.record {
        log::warn!("recording is not supported in this build; frames will not be saved");
    }

    let mut source = FrameSource::open(
        &descriptor,
        &SourceSettings {
            resolution: cfg.resolution()?,
            target_fps: cfg.display.target_fps,
        },
    )?;
    source.connect()?;

    let detector = build_detector(&cfg.detector)?;
    log::info!(
        "detector backend {} ({} labels)",
        detector.name(),
        detector.labels().len()
    );

    let link = SerialLink::open(&cfg.serial.port, cfg.serial.baud_rate, cfg.serial.write_timeout)?;
    let mapper = CoordinateMapper::for_resolution(
        cfg.mapping.reference_width,
        cfg.mapping.reference_height,
    );
    let tracker = TemplateTracker::new(cfg.tracker.clone());
    let fusion = FusionController::new(cfg.fusion.clone(), tracker);
    let mut follow = FollowLoop::new(detector, fusion, mapper, link);

    let mut indicator: Box<dyn Indicator> = match cfg.indicator.gpio_pin {
        Some(pin) => Box::new(SysfsGpioIndicator::new(pin)),
        None => Box::new(NullIndicator::default()),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "followd running: source={} serial={} threshold={} timeout={:?} center={:?}",
        descriptor,
        cfg.serial.port,
        cfg.fusion.confidence_threshold,
        cfg.fusion.no_object_timeout,
        mapper.center()
    );

    let options = LoopOptions {
        max_cycles: args.max_cycles,
        step_through: args.step,
        ..LoopOptions::default()
    };
    let result = follow.run(&mut source, indicator.as_mut(), &shutdown, &options);
    let average_fps = follow.average_fps();
    let closed = follow.close();

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(close_err) = closed {
                log::error!("serial teardown failed: {:#}", close_err);
            }
            log::error!("follow loop failed: {:#}", err);
            println!("Average pipeline FPS: {:.2}", average_fps);
            return Err(err);
        }
    };
    closed?;

    log::info!(
        "processed {} frames from {} ({:?})",
        source.stats().frames_captured,
        source.stats().source,
        summary.reason
    );
    println!("Average pipeline FPS: {:.2}", summary.average_fps);
    Ok(())
}

fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let labels = match &settings.labels_path {
        Some(path) => Some(LabelMap::load(path)?),
        None => None,
    };
    let mut registry = BackendRegistry::new();
    match settings.backend.as_str() {
        BACKEND_SCRIPTED => {
            let script = settings
                .script_path
                .as_deref()
                .context("the scripted backend requires a script path")?;
            let mut backend = ScriptedBackend::load(script)?;
            if let Some(labels) = labels {
                backend = backend.with_labels(labels);
            }
            registry.register(backend);
        }
        #[cfg(feature = "backend-tract")]
        target_follow::config::BACKEND_TRACT => {
            let model = settings
                .model_path
                .as_deref()
                .context("the tract backend requires a model path")?;
            let mut backend = target_follow::detect::TractBackend::new(
                model,
                settings.input_width,
                settings.input_height,
            )?
            .with_candidate_threshold(settings.candidate_threshold)
            .with_iou_threshold(settings.iou_threshold);
            if let Some(labels) = labels {
                backend = backend.with_labels(labels);
            }
            registry.register(backend);
        }
        other => anyhow::bail!("detector backend '{}' is not available in this build", other),
    }
    let mut detector = registry.take(Some(settings.backend.as_str()))?;
    detector.warm_up()?;
    Ok(detector)
}
