use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// `[tool]`: where the tool's own assets are installed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolRootConfig {
    /// Install root holding `configs/`, `src/`, `tools/`, `boundary/` and
    /// `module-contrib/`. Defaults to the directory of the running binary.
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub root: PathBuf,
    /// Profile catalog.
    pub configs_dir: PathBuf,
}

impl ToolPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            configs_dir: root.join("configs"),
            root,
        }
    }

    pub fn springboard_search(&self) -> PathBuf {
        self.root.join("tools").join("springboard_search.sh")
    }
}

fn default_root() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::precondition(format!("cannot locate running binary: {e}")))?;
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::precondition("running binary has no parent directory"))
}

/// Resolve and validate the install root. The profile catalog must exist:
/// without it no kernel can be matched.
pub fn load_paths(cfg: &ToolRootConfig) -> Result<ToolPaths> {
    let root = match cfg.root.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                std::env::current_dir()
                    .map_err(|e| Error::msg(format!("cwd error: {e}")))?
                    .join(p)
            }
        }
        None => default_root()?,
    };
    let paths = ToolPaths::new(root);
    if !paths.configs_dir.is_dir() {
        return Err(Error::precondition(format!(
            "profile catalog {} not found; set [tool].root or --tool-root to the install root",
            paths.configs_dir.display()
        )));
    }
    Ok(paths)
}
