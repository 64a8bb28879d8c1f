use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

/// The effective configuration of one run: the optional tool config file,
/// its `extends` chain, and the `[run]` table injected by the CLI.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Sandbox + extraction against an installed release kernel.
    Init,
    /// Sandbox + extraction against a developer kernel build tree.
    DevInit,
    /// Package an already initialised sandbox.
    Build,
    /// Mirror a kernel source tree into a target directory.
    ExtractSrc,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Init => "init",
            RunMode::DevInit => "dev-init",
            RunMode::Build => "build",
            RunMode::ExtractSrc => "extract-src",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub mode: RunMode,
    /// `uname -r` of the target kernel (init only).
    pub release: Option<String>,
    pub kernel_src: Option<String>,
    pub work_dir: Option<String>,
    pub target_dir: Option<String>,
    /// Git ref to check out before mirroring (extract-src only).
    pub checkout: Option<String>,
}

impl RunConfig {
    pub fn require<'a>(&self, field: &'a str, value: &'a Option<String>) -> Result<&'a str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "[run].{field} is required for mode '{}'",
                    self.mode.as_str()
                ))
            })
    }

    pub fn work_dir(&self) -> Result<PathBuf> {
        Ok(absolutize(Path::new(self.require("work_dir", &self.work_dir)?)))
    }

    pub fn kernel_src(&self) -> Result<PathBuf> {
        Ok(absolutize(Path::new(
            self.require("kernel_src", &self.kernel_src)?,
        )))
    }
}

impl ConfigDoc {
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<defaults>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }

    pub fn run(&self) -> Result<RunConfig> {
        self.deserialize_path("run")?
            .ok_or_else(|| Error::config("missing [run] table"))
    }

    pub fn run_mode(&self) -> Option<RunMode> {
        self.deserialize_path::<RunConfig>("run")
            .ok()
            .flatten()
            .map(|r| r.mode)
    }

    /// Deep-merge `overlay` on top of this document.
    pub fn with_overlay(mut self, overlay: Value) -> Self {
        merge(&mut self.value, overlay);
        self
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn absolutize(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path).map_err(|e| {
        Error::precondition(format!("failed to read config {}: {e}", path.display()))
    })?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        if tbl.contains_key("run") {
            return Err(Error::config(format!(
                "{}: [run] is set from the command line and may not appear in config files",
                path.display()
            )));
        }
    }
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}
