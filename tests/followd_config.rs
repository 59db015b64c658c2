use std::sync::Mutex;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use target_follow::config::{ConfigOverrides, FollowConfig};
use target_follow::SourceDescriptor;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FOLLOW_CONFIG",
        "FOLLOW_SERIAL_PORT",
        "FOLLOW_SERIAL_BAUD",
        "FOLLOW_THRESHOLD",
        "FOLLOW_TIMEOUT_MS",
        "FOLLOW_SOURCE",
        "FOLLOW_MODEL",
        "FOLLOW_GPIO_PIN",
    ] {
        std::env::remove_var(key);
    }
}

fn write_script(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("script.json");
    std::fs::write(&path, r#"{"labels": ["target"], "frames": []}"#).expect("write script");
    path
}

#[test]
fn loads_config_from_file_env_and_cli() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_script(&dir);
    let mut file = NamedTempFile::new().expect("temp config");
    let json = format!(
        r#"{{
            "source": "stub://bench?frames=10",
            "serial": {{
                "port": "/dev/ttyUSB0",
                "baud_rate": 115200,
                "write_timeout_ms": 50
            }},
            "fusion": {{
                "confidence_threshold": 0.6,
                "no_object_timeout_ms": 500
            }},
            "mapping": {{
                "reference_width": 1920,
                "reference_height": 1080
            }},
            "detector": {{
                "backend": "scripted",
                "script_path": "{}"
            }},
            "tracker": {{
                "search_margin": 48
            }},
            "display": {{
                "resolution": "640x360"
            }}
        }}"#,
        script.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FOLLOW_CONFIG", file.path());
    std::env::set_var("FOLLOW_SERIAL_BAUD", "57600");
    std::env::set_var("FOLLOW_TIMEOUT_MS", "900");
    std::env::set_var("FOLLOW_GPIO_PIN", "26");

    let overrides = ConfigOverrides {
        threshold: Some(0.7),
        ..ConfigOverrides::default()
    };
    let cfg = FollowConfig::load(&overrides).expect("load config");

    assert_eq!(cfg.serial.port, "/dev/ttyUSB0");
    assert_eq!(cfg.serial.baud_rate, 57_600);
    assert_eq!(cfg.serial.write_timeout, Duration::from_millis(50));
    assert_eq!(cfg.fusion.confidence_threshold, 0.7);
    assert_eq!(cfg.fusion.no_object_timeout, Duration::from_millis(900));
    assert_eq!(cfg.mapping.reference_width, 1920);
    assert_eq!(cfg.mapping.reference_height, 1080);
    assert_eq!(cfg.detector.backend, "scripted");
    assert_eq!(cfg.detector.script_path.as_deref(), Some(script.as_path()));
    assert_eq!(cfg.tracker.search_margin, 48);
    assert_eq!(cfg.indicator.gpio_pin, Some(26));
    assert_eq!(cfg.resolution().unwrap(), Some((640, 360)));
    assert_eq!(
        cfg.source_descriptor().unwrap(),
        SourceDescriptor::Synthetic {
            name: "bench".to_string(),
            frames: Some(10)
        }
    );

    clear_env();
}

#[test]
fn invalid_values_are_rejected_before_the_loop_starts() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_script(&dir);
    let base = ConfigOverrides {
        source: Some("stub://bench".to_string()),
        backend: Some("scripted".to_string()),
        script_path: Some(script),
        ..ConfigOverrides::default()
    };
    assert!(FollowConfig::load(&base).is_ok());

    let bad_threshold = ConfigOverrides {
        threshold: Some(-0.1),
        ..base.clone()
    };
    assert!(FollowConfig::load(&bad_threshold).is_err());

    let bad_resolution = ConfigOverrides {
        resolution: Some("1280by720".to_string()),
        ..base.clone()
    };
    assert!(FollowConfig::load(&bad_resolution).is_err());

    let bad_source = ConfigOverrides {
        source: Some(dir.path().join("missing.mp4").display().to_string()),
        ..base.clone()
    };
    assert!(FollowConfig::load(&bad_source).is_err());

    let missing_script = ConfigOverrides {
        script_path: Some(dir.path().join("nope.json")),
        ..base.clone()
    };
    assert!(FollowConfig::load(&missing_script).is_err());

    let record_without_resolution = ConfigOverrides {
        record: true,
        ..base.clone()
    };
    assert!(FollowConfig::load(&record_without_resolution).is_err());

    std::env::set_var("FOLLOW_TIMEOUT_MS", "0");
    assert!(FollowConfig::load(&base).is_err());
    std::env::set_var("FOLLOW_TIMEOUT_MS", "soon");
    assert!(FollowConfig::load(&base).is_err());

    clear_env();
}

#[test]
fn missing_model_path_is_a_configuration_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    std::env::set_var("FOLLOW_MODEL", dir.path().join("best.onnx"));
    let overrides = ConfigOverrides {
        source: Some("stub://bench".to_string()),
        backend: Some("tract".to_string()),
        ..ConfigOverrides::default()
    };
    let err = FollowConfig::load(&overrides).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("backend-tract") || message.contains("not found"));

    clear_env();
}
