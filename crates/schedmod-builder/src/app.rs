//! Glue between a command-line invocation and the planner/executor.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use toml::Value;

use crate::config::{self, ConfigDoc, RunMode};
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ExecSink, builtin_registry, execute_plan};
use crate::modules::build_plan;
use crate::planner::Plan;

/// One invocation, rendered into the `[run]` table.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<String>,
}

fn path_str(p: &Path) -> String {
    p.display().to_string()
}

impl RunRequest {
    fn new(mode: RunMode) -> Self {
        Self {
            mode: mode.as_str(),
            release: None,
            kernel_src: None,
            work_dir: None,
            target_dir: None,
            checkout: None,
        }
    }

    pub fn init(release: &str, kernel_src: &Path, work_dir: &Path) -> Self {
        Self {
            release: Some(release.to_string()),
            kernel_src: Some(path_str(kernel_src)),
            work_dir: Some(path_str(work_dir)),
            ..Self::new(RunMode::Init)
        }
    }

    pub fn dev_init(kernel_src: &Path, work_dir: &Path) -> Self {
        Self {
            kernel_src: Some(path_str(kernel_src)),
            work_dir: Some(path_str(work_dir)),
            ..Self::new(RunMode::DevInit)
        }
    }

    pub fn build(work_dir: &Path) -> Self {
        Self {
            work_dir: Some(path_str(work_dir)),
            ..Self::new(RunMode::Build)
        }
    }

    pub fn extract_src(kernel_src: &Path, target_dir: &Path, checkout: Option<&str>) -> Self {
        Self {
            kernel_src: Some(path_str(kernel_src)),
            target_dir: Some(path_str(target_dir)),
            checkout: checkout.map(str::to_string),
            ..Self::new(RunMode::ExtractSrc)
        }
    }
}

/// `[tool].root` from the command line, if given.
pub fn tool_overlay(tool_root: Option<&Path>) -> Value {
    let mut root = toml::Table::new();
    if let Some(p) = tool_root {
        let mut tool = toml::Table::new();
        tool.insert("root".into(), Value::String(path_str(p)));
        root.insert("tool".into(), Value::Table(tool));
    }
    Value::Table(root)
}

/// The command-line overlay: `[run]` plus an optional `[tool].root`.
pub fn overlay(req: &RunRequest, tool_root: Option<&Path>) -> Result<Value> {
    let run = Value::try_from(req).map_err(|e| Error::msg(format!("run table encode error: {e}")))?;
    let mut out = tool_overlay(tool_root);
    if let Some(tbl) = out.as_table_mut() {
        tbl.insert("run".into(), run);
    }
    Ok(out)
}

/// Config file (if any) with the command-line overlay on top.
pub fn load_doc(config_path: Option<&Path>, overlay: Value) -> Result<ConfigDoc> {
    let base = match config_path {
        Some(p) => config::load(p)?,
        None => ConfigDoc::empty(),
    };
    Ok(base.with_overlay(overlay))
}

pub fn plan(doc: &ConfigDoc) -> Result<Plan> {
    build_plan(doc)
}

/// Plan and run every task for the document's mode.
pub fn execute(doc: &ConfigDoc, dry_run: bool, sink: Arc<dyn ExecSink>) -> Result<()> {
    let plan = build_plan(doc)?;
    let reg = builtin_registry()?;
    let mut ctx = ExecCtx::new(dry_run, sink);
    execute_plan(doc, &plan, &reg, &mut ctx)
}

pub fn resolve_text(doc: &ConfigDoc) -> Result<String> {
    toml::to_string_pretty(&doc.value).map_err(|e| Error::msg(format!("toml encode error: {e}")))
}
