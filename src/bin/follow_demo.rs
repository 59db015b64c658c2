//! follow_demo - end-to-end synthetic run of the follow loop
//!
//! Generates a detection script for the synthetic scene (with dropouts and
//! weak frames so the tracker has to coast), runs the full loop on it and
//! writes the serial stream to a file or a real port.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use target_follow::ingest::synthetic_target;
use target_follow::{
    parse_command, CoordinateMapper, Detection, FollowLoop, FrameSource, FusionConfig,
    FusionController, LoopOptions, NullIndicator, RunSummary, ScriptedBackend, SerialLink,
    SourceDescriptor, SourceSettings, TemplateTracker, TemplateTrackerConfig,
};

const SCRIPT_CONFIDENCE: f32 = 0.85;
const WEAK_CONFIDENCE: f32 = 0.3;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames.
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Synthetic frame size (WxH).
    #[arg(long, default_value = "640x360")]
    resolution: String,
    /// Output directory for the detection script and serial log.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Send commands to this serial port instead of the log file.
    #[arg(long)]
    serial_port: Option<String>,
    #[arg(long, default_value_t = target_follow::serial::DEFAULT_BAUD_RATE)]
    baud: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }
    let (width, height) = target_follow::config::parse_resolution(&args.resolution)?;

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let script_path = out_dir.join("script.json");
    write_script(&script_path, args.frames, width, height)?;
    println!("Detection script: {}", script_path.display());

    let descriptor = SourceDescriptor::parse(&format!("stub://demo?frames={}", args.frames))?;
    let mut source = FrameSource::open(
        &descriptor,
        &SourceSettings {
            resolution: Some((width, height)),
            ..SourceSettings::default()
        },
    )?;
    source.connect()?;
    let detector = ScriptedBackend::load(&script_path)?;
    let mapper = CoordinateMapper::for_resolution(width, height);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let summary = match &args.serial_port {
        Some(port) => {
            let link = SerialLink::open(
                port,
                args.baud,
                target_follow::serial::DEFAULT_WRITE_TIMEOUT,
            )?;
            let (summary, _) = run_demo(detector, mapper, link, &mut source, &shutdown)?;
            summary
        }
        None => {
            let log_path = out_dir.join("serial.log");
            let file = fs::File::create(&log_path)
                .with_context(|| format!("failed to create {}", log_path.display()))?;
            let link = SerialLink::new(file, log_path.display().to_string());
            let (summary, _) = run_demo(detector, mapper, link, &mut source, &shutdown)?;
            check_serial_log(&log_path, summary.messages_sent)?;
            println!("Serial log: {}", log_path.display());
            summary
        }
    };

    println!(
        "Cycles: {} ({} with a target, {} commands, {} bytes)",
        summary.cycles, summary.cycles_with_target, summary.messages_sent, summary.bytes_sent
    );
    println!("Stopped: {:?}", summary.reason);
    println!("Average pipeline FPS: {:.2}", summary.average_fps);
    Ok(())
}

fn run_demo<W: Write>(
    detector: ScriptedBackend,
    mapper: CoordinateMapper,
    link: SerialLink<W>,
    source: &mut FrameSource,
    shutdown: &AtomicBool,
) -> Result<(RunSummary, W)> {
    let fusion = FusionController::new(
        FusionConfig::default(),
        TemplateTracker::new(TemplateTrackerConfig::default()),
    );
    let mut follow = FollowLoop::new(Box::new(detector), fusion, mapper, link);
    let mut indicator = NullIndicator::default();
    let result = follow.run(source, &mut indicator, shutdown, &LoopOptions::default());
    let sink = follow.close()?;
    Ok((result?, sink))
}

/// Ground truth for every frame, except for dropouts (empty lists) and
/// low-confidence stretches where the tracker has to carry the target.
fn write_script(path: &Path, frames: u64, width: u32, height: u32) -> Result<()> {
    let script: Vec<Vec<Detection>> = (0..frames)
        .map(|index| {
            let bbox = synthetic_target(index, width, height);
            match index % 30 {
                10..=15 => Vec::new(),
                20..=22 => vec![Detection::new(bbox, WEAK_CONFIDENCE, 0)],
                _ => vec![Detection::new(bbox, SCRIPT_CONFIDENCE, 0)],
            }
        })
        .collect();
    let body = serde_json::json!({
        "labels": ["target"],
        "frames": script,
    });
    fs::write(path, serde_json::to_vec_pretty(&body)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn check_serial_log(path: &Path, expected: u64) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut count = 0u64;
    for line in raw.split_inclusive('\n') {
        parse_command(line)?;
        count += 1;
    }
    if count != expected {
        return Err(anyhow!(
            "serial log holds {} commands, expected {}",
            count,
            expected
        ));
    }
    Ok(())
}
