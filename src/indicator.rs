//! Status indicator hooks.
//!
//! The loop turns the indicator on when it starts and off on every exit path.
//! The indicator never feeds back into fusion.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
/// Pin wired to the status light on the reference rig.
pub const DEFAULT_GPIO_PIN: u32 = 26;

pub trait Indicator {
    fn activate(&mut self) -> Result<()>;
    fn deactivate(&mut self) -> Result<()>;
}

/// Indicator that only logs.
#[derive(Debug, Default)]
pub struct NullIndicator {
    active: bool,
}

impl NullIndicator {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Indicator for NullIndicator {
    fn activate(&mut self) -> Result<()> {
        self.active = true;
        log::debug!("indicator: on");
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.active = false;
        log::debug!("indicator: off");
        Ok(())
    }
}

/// Output pin driven through the Linux sysfs GPIO interface.
pub struct SysfsGpioIndicator {
    pin: u32,
    root: PathBuf,
    exported_here: bool,
}

impl SysfsGpioIndicator {
    pub fn new(pin: u32) -> Self {
        Self::with_root(pin, DEFAULT_GPIO_ROOT)
    }

    pub fn with_root(pin: u32, root: impl Into<PathBuf>) -> Self {
        Self {
            pin,
            root: root.into(),
            exported_here: false,
        }
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn write(&self, path: &Path, value: &str) -> Result<()> {
        std::fs::write(path, value)
            .with_context(|| format!("failed to write '{}' to {}", value, path.display()))
    }
}

impl Default for SysfsGpioIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_GPIO_PIN)
    }
}

impl Indicator for SysfsGpioIndicator {
    fn activate(&mut self) -> Result<()> {
        let pin_dir = self.pin_dir();
        if !pin_dir.exists() {
            self.write(&self.root.join("export"), &self.pin.to_string())?;
            self.exported_here = true;
            if !pin_dir.exists() {
                return Err(anyhow!(
                    "gpio{} did not appear under {} after export",
                    self.pin,
                    self.root.display()
                ));
            }
        }
        self.write(&pin_dir.join("direction"), "out")?;
        self.write(&pin_dir.join("value"), "1")?;
        log::info!("indicator gpio{} on", self.pin);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        let pin_dir = self.pin_dir();
        self.write(&pin_dir.join("value"), "0")?;
        if self.exported_here {
            self.write(&self.root.join("unexport"), &self.pin.to_string())?;
            self.exported_here = false;
        }
        log::info!("indicator gpio{} off", self.pin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_pin_value_through_sysfs_files() -> Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("gpio26"))?;
        let mut indicator = SysfsGpioIndicator::with_root(26, root.path());

        indicator.activate()?;
        let value = std::fs::read_to_string(root.path().join("gpio26/value"))?;
        let direction = std::fs::read_to_string(root.path().join("gpio26/direction"))?;
        assert_eq!((value.as_str(), direction.as_str()), ("1", "out"));
        assert!(!root.path().join("export").exists());

        indicator.deactivate()?;
        let value = std::fs::read_to_string(root.path().join("gpio26/value"))?;
        assert_eq!(value, "0");
        Ok(())
    }

    #[test]
    fn missing_pin_after_export_is_an_error() -> Result<()> {
        let root = tempfile::tempdir()?;
        let mut indicator = SysfsGpioIndicator::with_root(5, root.path());
        assert!(indicator.activate().is_err());
        assert_eq!(std::fs::read_to_string(root.path().join("export"))?, "5");
        Ok(())
    }
}
