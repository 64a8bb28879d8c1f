//! The extraction pipeline as a strict state machine over external stages.

pub mod command;
pub mod springboard;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::sandbox::SandboxLayout;

pub use command::{CommandBuilder, ExtractStage, ToolCommand, ToolRunner, ToolsConfig};
pub use springboard::needs_old_springboard_fix;

pub const PRE_EXTRACT_PATCH: &str = "pre_extract.patch";
pub const POST_EXTRACT_PATCH: &str = "post_extract.patch";
pub const SPRINGBOARD_PATCH: &str = "dynamic_springboard.patch";
pub const OLD_SPRINGBOARD_PATCH: &str = "dynamic_springboard_2.patch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Fresh,
    PrePatched,
    Extracted,
    PostPatched,
    SpringboardPatched,
    OldSpringboardPatched,
    Finalized,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Fresh => "fresh",
            PipelineStage::PrePatched => "pre-patched",
            PipelineStage::Extracted => "extracted",
            PipelineStage::PostPatched => "post-patched",
            PipelineStage::SpringboardPatched => "springboard-patched",
            PipelineStage::OldSpringboardPatched => "old-springboard-patched",
            PipelineStage::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// What every external stage is parameterised with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub tmp_dir: PathBuf,
    pub mod_path: PathBuf,
    /// Extraction objects (`<file>.extract`).
    pub objs: Vec<String>,
}

/// Finalize inputs: the springboard helper and the kernel artifacts it reads.
#[derive(Debug, Clone)]
pub struct FinalizeInputs<'a> {
    pub script: &'a Path,
    pub vmlinux: &'a Path,
    pub config: &'a Path,
}

#[derive(Debug, Clone)]
pub struct PipelineDriver {
    work_dir: PathBuf,
    state: PipelineState,
    tools: ToolsConfig,
    stage: PipelineStage,
    legacy_fix: Option<bool>,
    applied: Vec<String>,
}

impl PipelineDriver {
    pub fn new(layout: &SandboxLayout, objs: Vec<String>, tools: ToolsConfig) -> Self {
        Self {
            work_dir: layout.work_dir.clone(),
            state: PipelineState {
                tmp_dir: layout.tmp_dir.clone(),
                mod_path: layout.mod_path.clone(),
                objs,
            },
            tools,
            stage: PipelineStage::Fresh,
            legacy_fix: None,
            applied: Vec::new(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Whether the legacy springboard check ran and found the fix needed.
    pub fn legacy_fix(&self) -> Option<bool> {
        self.legacy_fix
    }

    /// Patches actually applied, in order.
    pub fn applied_patches(&self) -> &[String] {
        &self.applied
    }

    fn commands(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(&self.tools, &self.work_dir)
    }

    fn require_stage(&self, want: PipelineStage, op: &str) -> Result<()> {
        if self.stage != want {
            return Err(Error::sequence(format!(
                "cannot run {op} in state '{}' (expected '{want}')",
                self.stage
            )));
        }
        Ok(())
    }

    fn patch_if_present(&mut self, runner: &mut dyn ToolRunner, name: &str) -> Result<bool> {
        let path = self.state.tmp_dir.join(name);
        if !path.is_file() {
            runner.note(&format!("{name} not present, skipped"));
            return Ok(false);
        }
        runner.note(&format!("applying {name}"));
        let cmd = self.commands().patch(&path);
        runner.run_tool(&cmd)?;
        self.applied.push(name.to_string());
        Ok(true)
    }

    pub fn pre_patch(&mut self, runner: &mut dyn ToolRunner) -> Result<()> {
        self.require_stage(PipelineStage::Fresh, "pre-patch")?;
        self.patch_if_present(runner, PRE_EXTRACT_PATCH)?;
        self.stage = PipelineStage::PrePatched;
        Ok(())
    }

    pub fn extract(&mut self, runner: &mut dyn ToolRunner) -> Result<()> {
        self.require_stage(PipelineStage::PrePatched, "extract")?;
        runner.note(&format!(
            "extracting scheduler module objs: {}",
            self.state.objs.join(" ")
        ));
        for stage in ExtractStage::SEQUENCE {
            let cmd = self.commands().extract_stage(
                stage,
                &self.state.tmp_dir,
                &self.state.mod_path,
                &self.state.objs,
            );
            runner.run_tool(&cmd)?;
        }
        self.stage = PipelineStage::Extracted;
        Ok(())
    }

    pub fn post_patch(&mut self, runner: &mut dyn ToolRunner) -> Result<()> {
        self.require_stage(PipelineStage::Extracted, "post-patch")?;
        self.patch_if_present(runner, POST_EXTRACT_PATCH)?;
        self.stage = PipelineStage::PostPatched;
        Ok(())
    }

    pub fn springboard_patch(&mut self, runner: &mut dyn ToolRunner) -> Result<()> {
        self.require_stage(PipelineStage::PostPatched, "springboard patch")?;
        self.patch_if_present(runner, SPRINGBOARD_PATCH)?;
        self.stage = PipelineStage::SpringboardPatched;
        Ok(())
    }

    /// Sniff the extracted `core.c` and apply the second springboard patch
    /// when the kernel predates the frame-pointer marker.
    pub fn legacy_springboard_patch(&mut self, runner: &mut dyn ToolRunner) -> Result<bool> {
        self.require_stage(PipelineStage::SpringboardPatched, "legacy springboard check")?;
        if self.legacy_fix.is_some() {
            return Err(Error::sequence("legacy springboard check already ran"));
        }
        let core = self.state.mod_path.join("core.c");
        let text = fs::read_to_string(&core).map_err(|e| {
            Error::process(format!(
                "failed to read extracted {}: {e}",
                core.display()
            ))
        })?;
        let lines: Vec<&str> = text.lines().collect();
        let needed = needs_old_springboard_fix(&lines);
        self.legacy_fix = Some(needed);
        if needed {
            runner.note("old springboard layout detected");
            self.patch_if_present(runner, OLD_SPRINGBOARD_PATCH)?;
            self.stage = PipelineStage::OldSpringboardPatched;
        }
        Ok(needed)
    }

    /// Append the springboard discovery output to the module Makefile.
    pub fn finalize(&mut self, runner: &mut dyn ToolRunner, inputs: &FinalizeInputs<'_>) -> Result<()> {
        let ready = match self.stage {
            PipelineStage::OldSpringboardPatched => true,
            PipelineStage::SpringboardPatched => self.legacy_fix.is_some(),
            _ => false,
        };
        if !ready {
            return Err(Error::sequence(format!(
                "cannot finalize in state '{}' before the legacy springboard check",
                self.stage
            )));
        }
        let cmd = self.commands().springboard_init(
            inputs.script,
            inputs.vmlinux,
            inputs.config,
            &self.state.mod_path.join("Makefile"),
        );
        runner.run_tool(&cmd)?;
        self.stage = PipelineStage::Finalized;
        Ok(())
    }

    /// Every stage back to back.
    pub fn run_all(&mut self, runner: &mut dyn ToolRunner, inputs: &FinalizeInputs<'_>) -> Result<()> {
        self.pre_patch(runner)?;
        self.extract(runner)?;
        self.post_patch(runner)?;
        self.springboard_patch(runner)?;
        self.legacy_springboard_patch(runner)?;
        self.finalize(runner, inputs)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records invocations instead of running them.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub commands: Vec<ToolCommand>,
        pub notes: Vec<String>,
        pub fail_on: Option<String>,
    }

    impl RecordingRunner {
        pub fn labels(&self) -> Vec<&str> {
            self.commands.iter().map(|c| c.label.as_str()).collect()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run_tool(&mut self, cmd: &ToolCommand) -> Result<()> {
            self.commands.push(cmd.clone());
            if self.fail_on.as_deref() == Some(cmd.label.as_str()) {
                return Err(Error::process(format!("{} exited with status 2", cmd.label)));
            }
            Ok(())
        }

        fn note(&mut self, line: &str) {
            self.notes.push(line.to_string());
        }
    }
}
