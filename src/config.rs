use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fusion::{FusionConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NO_OBJECT_TIMEOUT};
use crate::ingest::SourceDescriptor;
use crate::mapping::{DEFAULT_REFERENCE_HEIGHT, DEFAULT_REFERENCE_WIDTH};
use crate::serial::{DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT, DEFAULT_WRITE_TIMEOUT};
use crate::track::TemplateTrackerConfig;

pub const BACKEND_SCRIPTED: &str = "scripted";
pub const BACKEND_TRACT: &str = "tract";

const DEFAULT_BACKEND: &str = BACKEND_TRACT;
const DEFAULT_SOURCE: &str = "usb0";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CANDIDATE_THRESHOLD: f32 = 0.25;
const DEFAULT_TARGET_FPS: u32 = 0;

#[derive(Debug, Deserialize, Default)]
struct FollowConfigFile {
    source: Option<String>,
    serial: Option<SerialConfigFile>,
    fusion: Option<FusionConfigFile>,
    mapping: Option<MappingConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    indicator: Option<IndicatorConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    confidence_threshold: Option<f32>,
    no_object_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MappingConfigFile {
    reference_width: Option<u32>,
    reference_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    candidate_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    search_margin: Option<u32>,
    max_mean_difference: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct IndicatorConfigFile {
    gpio_pin: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    resolution: Option<String>,
    record: Option<bool>,
    target_fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FollowConfig {
    pub source: String,
    pub serial: SerialSettings,
    pub fusion: FusionConfig,
    pub mapping: MappingSettings,
    pub detector: DetectorSettings,
    pub tracker: TemplateTrackerConfig,
    pub indicator: IndicatorSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MappingSettings {
    pub reference_width: u32,
    pub reference_height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    /// Scores below this are dropped inside the detector, before fusion.
    pub candidate_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct IndicatorSettings {
    /// Absent means log-only.
    pub gpio_pin: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    /// Raw `WxH` string as configured; parsed by `resolution()`.
    pub resolution: Option<String>,
    pub record: bool,
    pub target_fps: u32,
}

/// Command-line values layered on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source: Option<String>,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub backend: Option<String>,
    pub threshold: Option<f32>,
    pub resolution: Option<String>,
    pub record: bool,
    pub serial_port: Option<String>,
    pub baud_rate: Option<u32>,
    pub gpio_pin: Option<u32>,
}

impl FollowConfig {
    /// Defaults, then `FOLLOW_CONFIG`, then `FOLLOW_*` variables, then
    /// `overrides`. Validation runs last.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = std::env::var("FOLLOW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FollowConfigFile) -> Self {
        let serial = file.serial.unwrap_or_default();
        let fusion = file.fusion.unwrap_or_default();
        let mapping = file.mapping.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let tracker_defaults = TemplateTrackerConfig::default();

        Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            serial: SerialSettings {
                port: serial
                    .port
                    .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
                baud_rate: serial.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                write_timeout: serial
                    .write_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WRITE_TIMEOUT),
            },
            fusion: FusionConfig {
                confidence_threshold: fusion
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                no_object_timeout: fusion
                    .no_object_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_NO_OBJECT_TIMEOUT),
            },
            mapping: MappingSettings {
                reference_width: mapping.reference_width.unwrap_or(DEFAULT_REFERENCE_WIDTH),
                reference_height: mapping
                    .reference_height
                    .unwrap_or(DEFAULT_REFERENCE_HEIGHT),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                script_path: detector.script_path,
                input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                candidate_threshold: detector
                    .candidate_threshold
                    .unwrap_or(DEFAULT_CANDIDATE_THRESHOLD),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            tracker: TemplateTrackerConfig {
                search_margin: tracker
                    .search_margin
                    .unwrap_or(tracker_defaults.search_margin),
                max_mean_difference: tracker
                    .max_mean_difference
                    .unwrap_or(tracker_defaults.max_mean_difference),
                ..tracker_defaults
            },
            indicator: IndicatorSettings {
                gpio_pin: file.indicator.and_then(|indicator| indicator.gpio_pin),
            },
            display: DisplaySettings {
                resolution: display.resolution,
                record: display.record.unwrap_or(false),
                target_fps: display.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = non_empty_env("FOLLOW_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(baud) = non_empty_env("FOLLOW_SERIAL_BAUD") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| anyhow!("FOLLOW_SERIAL_BAUD must be an integer baud rate"))?;
        }
        if let Some(threshold) = non_empty_env("FOLLOW_THRESHOLD") {
            self.fusion.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("FOLLOW_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(timeout) = non_empty_env("FOLLOW_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("FOLLOW_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.fusion.no_object_timeout = Duration::from_millis(millis);
        }
        if let Some(source) = non_empty_env("FOLLOW_SOURCE") {
            self.source = source;
        }
        if let Some(model) = non_empty_env("FOLLOW_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
        }
        if let Some(pin) = non_empty_env("FOLLOW_GPIO_PIN") {
            let pin = pin
                .parse()
                .map_err(|_| anyhow!("FOLLOW_GPIO_PIN must be a GPIO line number"))?;
            self.indicator.gpio_pin = Some(pin);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(source) = &overrides.source {
            self.source = source.clone();
        }
        if let Some(model) = &overrides.model_path {
            self.detector.model_path = Some(model.clone());
        }
        if let Some(labels) = &overrides.labels_path {
            self.detector.labels_path = Some(labels.clone());
        }
        if let Some(script) = &overrides.script_path {
            self.detector.script_path = Some(script.clone());
        }
        if let Some(backend) = &overrides.backend {
            self.detector.backend = backend.clone();
        }
        if let Some(threshold) = overrides.threshold {
            self.fusion.confidence_threshold = threshold;
        }
        if let Some(resolution) = &overrides.resolution {
            self.display.resolution = Some(resolution.clone());
        }
        if overrides.record {
            self.display.record = true;
        }
        if let Some(port) = &overrides.serial_port {
            self.serial.port = port.clone();
        }
        if let Some(baud) = overrides.baud_rate {
            self.serial.baud_rate = baud;
        }
        if let Some(pin) = overrides.gpio_pin {
            self.indicator.gpio_pin = Some(pin);
        }
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.fusion.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("confidence threshold must be within [0, 1], got {}", threshold);
        }
        if self.fusion.no_object_timeout.is_zero() {
            bail!("no-object timeout must be greater than zero");
        }
        if self.serial.port.trim().is_empty() {
            bail!("serial port must not be empty");
        }
        if self.serial.baud_rate == 0 {
            bail!("serial baud rate must be greater than zero");
        }
        if self.mapping.reference_width == 0 || self.mapping.reference_height == 0 {
            bail!("reference resolution must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            bail!("detector iou threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.detector.candidate_threshold) {
            bail!("detector candidate threshold must be within [0, 1]");
        }

        let resolution = self.resolution()?;
        let source = self.source_descriptor()?;
        source.ensure_supported()?;

        match self.detector.backend.as_str() {
            BACKEND_TRACT => {
                if !cfg!(feature = "backend-tract") {
                    bail!("the tract backend requires the backend-tract feature");
                }
                let model = self
                    .detector
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the tract backend requires a model path"))?;
                if !model.is_file() {
                    bail!(
                        "model path {} is invalid or not found",
                        model.display()
                    );
                }
                if self.detector.input_width == 0 || self.detector.input_height == 0 {
                    bail!("detector input size must be non-zero");
                }
            }
            BACKEND_SCRIPTED => {
                let script = self
                    .detector
                    .script_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the scripted backend requires a script path"))?;
                if !script.is_file() {
                    bail!("detection script {} not found", script.display());
                }
            }
            other => bail!(
                "unknown detector backend '{}' (expected {} or {})",
                other,
                BACKEND_TRACT,
                BACKEND_SCRIPTED
            ),
        }

        if let Some(labels) = &self.detector.labels_path {
            if !labels.is_file() {
                bail!("labels file {} not found", labels.display());
            }
        }

        if self.display.record {
            if !source.is_recordable() {
                bail!("recording only works with video and camera sources");
            }
            if resolution.is_none() {
                bail!("please specify a resolution to record video at");
            }
        }
        Ok(())
    }

    /// Parsed display resolution, if one is configured.
    pub fn resolution(&self) -> Result<Option<(u32, u32)>> {
        self.display
            .resolution
            .as_deref()
            .map(parse_resolution)
            .transpose()
    }

    pub fn source_descriptor(&self) -> Result<SourceDescriptor> {
        SourceDescriptor::parse(&self.source)
    }
}

/// Parse a `WxH` resolution string such as `1280x720`.
pub fn parse_resolution(raw: &str) -> Result<(u32, u32)> {
    let invalid = || anyhow!("resolution '{}' must look like WxH, e.g. 1280x720", raw);
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        bail!("resolution '{}' must have non-zero dimensions", raw);
    }
    Ok((width, height))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<FollowConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted_config(dir: &Path) -> Result<FollowConfig> {
        let script = dir.join("script.json");
        std::fs::write(&script, r#"{"frames": []}"#)?;
        let mut cfg = FollowConfig::from_file(FollowConfigFile::default());
        cfg.source = "stub://unit".to_string();
        cfg.detector.backend = BACKEND_SCRIPTED.to_string();
        cfg.detector.script_path = Some(script);
        Ok(cfg)
    }

    #[test]
    fn defaults_match_the_hardware_setup() {
        let cfg = FollowConfig::from_file(FollowConfigFile::default());
        assert_eq!(cfg.serial.port, "/dev/ttyAMA0");
        assert_eq!(cfg.serial.baud_rate, 57_600);
        assert_eq!(cfg.fusion.confidence_threshold, 0.5);
        assert_eq!(cfg.fusion.no_object_timeout, Duration::from_millis(750));
        assert_eq!(
            (cfg.mapping.reference_width, cfg.mapping.reference_height),
            (1280, 720)
        );
        assert!(cfg.indicator.gpio_pin.is_none());
        assert!(!cfg.display.record);
    }

    #[test]
    fn parses_resolution_strings() -> Result<()> {
        assert_eq!(parse_resolution("1280x720")?, (1280, 720));
        assert_eq!(parse_resolution(" 640X480 ")?, (640, 480));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
        assert!(parse_resolution("wide x tall").is_err());
        Ok(())
    }

    #[test]
    fn validation_rejects_out_of_range_values() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let cfg = scripted_config(dir.path())?;
        cfg.validate()?;
        assert_eq!(cfg.detector.candidate_threshold, 0.25);

        let mut cfg = scripted_config(dir.path())?;
        cfg.fusion.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.fusion.confidence_threshold = f32::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.fusion.no_object_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.serial.baud_rate = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.mapping.reference_height = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.detector.candidate_threshold = -0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.source = "not-a-source".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = scripted_config(dir.path())?;
        cfg.detector.backend = "opencv".to_string();
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn recording_needs_a_recordable_source_and_resolution() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = scripted_config(dir.path())?;
        cfg.display.record = true;
        cfg.display.resolution = Some("640x480".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("video and camera"));
        Ok(())
    }

    #[test]
    fn tract_backend_needs_a_model_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = scripted_config(dir.path())?;
        cfg.detector.backend = BACKEND_TRACT.to_string();
        cfg.detector.model_path = Some(dir.path().join("missing.onnx"));
        assert!(cfg.validate().is_err());
        Ok(())
    }
}
