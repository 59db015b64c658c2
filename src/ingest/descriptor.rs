use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "bmp", "BMP"];
pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "mov", "mp4", "mkv", "wmv"];

const SYNTHETIC_SCHEME: &str = "stub://";

/// Where frames come from, classified from the `--source` string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// A single still image.
    Image(PathBuf),
    /// Every still image directly inside a directory.
    Folder(PathBuf),
    /// A video file.
    Video(PathBuf),
    /// USB camera index (`usb0` is `/dev/video0`).
    Usb(u32),
    /// Raspberry Pi camera index.
    Picamera(u32),
    /// Synthetic scene, `stub://name[?frames=N]`.
    Synthetic { name: String, frames: Option<u64> },
}

impl SourceDescriptor {
    /// Classify a source string.
    ///
    /// Existing directories and files win over the `usbN`/`picameraN` forms.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("source must not be empty");
        }
        if let Some(rest) = raw.strip_prefix(SYNTHETIC_SCHEME) {
            return parse_synthetic(rest);
        }

        let path = Path::new(raw);
        if path.is_dir() {
            return Ok(Self::Folder(path.to_path_buf()));
        }
        if path.is_file() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if IMAGE_EXTENSIONS.contains(&ext) {
                return Ok(Self::Image(path.to_path_buf()));
            }
            if VIDEO_EXTENSIONS.contains(&ext) {
                return Ok(Self::Video(path.to_path_buf()));
            }
            bail!("file extension .{} is not supported", ext);
        }
        if let Some(index) = raw.strip_prefix("usb") {
            return Ok(Self::Usb(parse_index(raw, index)?));
        }
        if let Some(index) = raw.strip_prefix("picamera") {
            return Ok(Self::Picamera(parse_index(raw, index)?));
        }
        Err(anyhow!("input {} is invalid", raw))
    }

    /// Still-image sources, where each frame is presented on its own.
    pub fn is_still(&self) -> bool {
        matches!(self, Self::Image(_) | Self::Folder(_))
    }

    /// Sources that may be recorded.
    pub fn is_recordable(&self) -> bool {
        matches!(self, Self::Video(_) | Self::Usb(_))
    }

    /// Fail early when this build cannot open the source.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            Self::Video(_) if !cfg!(feature = "ingest-file-ffmpeg") => {
                bail!("video sources require the ingest-file-ffmpeg feature")
            }
            Self::Usb(_) if !cfg!(feature = "ingest-v4l2") => {
                bail!("USB camera sources require the ingest-v4l2 feature")
            }
            Self::Picamera(_) => bail!("picamera sources are not supported in this build"),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(path) => write!(f, "image {}", path.display()),
            Self::Folder(path) => write!(f, "folder {}", path.display()),
            Self::Video(path) => write!(f, "video {}", path.display()),
            Self::Usb(index) => write!(f, "usb{}", index),
            Self::Picamera(index) => write!(f, "picamera{}", index),
            Self::Synthetic { name, .. } => write!(f, "{}{}", SYNTHETIC_SCHEME, name),
        }
    }
}

fn parse_index(raw: &str, digits: &str) -> Result<u32> {
    digits
        .parse()
        .map_err(|_| anyhow!("input {} is invalid: expected a device index", raw))
}

fn parse_synthetic(rest: &str) -> Result<SourceDescriptor> {
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    if name.is_empty() {
        bail!("synthetic source needs a name (stub://<name>)");
    }
    let mut frames = None;
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    frames = Some(value.parse().map_err(|_| {
                        anyhow!("synthetic source frames must be an integer, got '{}'", value)
                    })?);
                }
                _ => bail!("unknown synthetic source parameter '{}'", pair),
            }
        }
    }
    Ok(SourceDescriptor::Synthetic {
        name: name.to_string(),
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_files_and_folders_by_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("shot.JPG");
        let video = dir.path().join("clip.mp4");
        let other = dir.path().join("notes.txt");
        let odd_case = dir.path().join("shot.Jpg");
        for path in [&image, &video, &other, &odd_case] {
            std::fs::write(path, b"x")?;
        }

        let parse = |p: &Path| SourceDescriptor::parse(p.to_str().unwrap());
        assert_eq!(parse(dir.path())?, SourceDescriptor::Folder(dir.path().to_path_buf()));
        assert_eq!(parse(&image)?, SourceDescriptor::Image(image.clone()));
        assert_eq!(parse(&video)?, SourceDescriptor::Video(video.clone()));
        assert!(parse(&other).is_err());
        assert!(parse(&odd_case).is_err());
        Ok(())
    }

    #[test]
    fn classifies_devices_and_synthetic_scenes() -> Result<()> {
        assert_eq!(SourceDescriptor::parse("usb0")?, SourceDescriptor::Usb(0));
        assert_eq!(SourceDescriptor::parse("picamera1")?, SourceDescriptor::Picamera(1));
        assert_eq!(
            SourceDescriptor::parse("stub://bench?frames=30")?,
            SourceDescriptor::Synthetic {
                name: "bench".into(),
                frames: Some(30)
            }
        );
        assert!(SourceDescriptor::parse("usbX").is_err());
        assert!(SourceDescriptor::parse("stub://bench?fps=3").is_err());
        assert!(SourceDescriptor::parse("rtsp://camera").is_err());
        assert!(SourceDescriptor::parse("").is_err());
        Ok(())
    }

    #[test]
    fn picamera_is_rejected_at_configuration_time() {
        assert!(SourceDescriptor::Picamera(0).ensure_supported().is_err());
        assert!(SourceDescriptor::Synthetic {
            name: "x".into(),
            frames: None
        }
        .ensure_supported()
        .is_ok());
    }
}
