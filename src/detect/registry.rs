use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Registry of detector backends, keyed by `DetectorBackend::name`.
///
/// The loop is single-threaded, so backends are owned directly and handed
/// out once with `take`.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove and return a backend by name, or the default when `name` is `None`.
    pub fn take(&mut self, name: Option<&str>) -> Result<Box<dyn DetectorBackend>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .default_name
                .clone()
                .ok_or_else(|| anyhow!("no detector backend registered"))?,
        };
        let backend = self.backends.remove(&name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        if self.default_name.as_deref() == Some(name.as_str()) {
            self.default_name = None;
        }
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
