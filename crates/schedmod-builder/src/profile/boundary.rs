use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Suffix the extraction makefile expects on every object it processes.
pub const EXTRACT_SUFFIX: &str = ".extract";

#[derive(Debug, Default, Deserialize)]
struct RawBoundary {
    #[serde(default)]
    mod_files: Option<Vec<String>>,
    #[serde(default)]
    sidecar: Option<Vec<(String, String)>>,
}

/// The parts of a profile's `boundary.yaml` this tool consumes. The
/// descriptor carries more keys for the extraction toolchain; they are
/// ignored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoundaryConfig {
    /// Kernel files moved into the module, `.c` and `.h` only, in order.
    pub mod_files: Vec<String>,
    /// `(object name, source.c)` pairs compiled alongside the module.
    pub sidecar: Vec<(String, String)>,
}

impl BoundaryConfig {
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let blank = text
            .lines()
            .map(str::trim)
            .all(|l| l.is_empty() || l.starts_with('#'));
        let raw: RawBoundary = if blank {
            RawBoundary::default()
        } else {
            serde_yaml::from_str::<Option<RawBoundary>>(text)
                .map_err(|e| Error::config(format!("{}: {e}", origin.display())))?
                .unwrap_or_default()
        };
        let cfg = Self {
            mod_files: raw.mod_files.unwrap_or_default(),
            sidecar: raw.sidecar.unwrap_or_default(),
        };
        cfg.validate(origin)?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read boundary descriptor {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text, path)
    }

    fn validate(&self, origin: &Path) -> Result<()> {
        for f in &self.mod_files {
            if !f.ends_with(".c") && !f.ends_with(".h") {
                return Err(Error::config(format!(
                    "{}: mod_files entry '{f}' is neither a .c nor a .h file",
                    origin.display()
                )));
            }
        }
        for (name, src) in &self.sidecar {
            if !src.ends_with(".c") {
                return Err(Error::config(format!(
                    "{}: sidecar '{name}' source '{src}' is not a .c file",
                    origin.display()
                )));
            }
        }
        Ok(())
    }

    pub fn module_sources(&self) -> Vec<&str> {
        self.mod_files
            .iter()
            .map(String::as_str)
            .filter(|f| f.ends_with(".c"))
            .collect()
    }

    pub fn module_headers(&self) -> Vec<&str> {
        self.mod_files
            .iter()
            .map(String::as_str)
            .filter(|f| f.ends_with(".h"))
            .collect()
    }

    pub fn sidecar_sources(&self) -> Vec<&str> {
        self.sidecar.iter().map(|(_, src)| src.as_str()).collect()
    }

    pub fn sidecar_objects(&self) -> Vec<String> {
        self.sidecar_sources()
            .into_iter()
            .map(|src| match src.strip_suffix(".c") {
                Some(stem) => format!("{stem}.o"),
                None => src.to_string(),
            })
            .collect()
    }

    /// Everything the extraction stage processes: module files then
    /// sidecar sources, each with the `.extract` suffix.
    pub fn extraction_objects(&self) -> Vec<String> {
        self.mod_files
            .iter()
            .map(String::as_str)
            .chain(self.sidecar_sources())
            .map(|f| format!("{f}{EXTRACT_SUFFIX}"))
            .collect()
    }
}
