//! The sandbox: a mirrored kernel tree with the module directory, the
//! extraction scratch directory and the tool's assets overlaid.

pub mod mapping;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::fsops::{self, MirrorStats};
use crate::kernel::KernelInputs;

pub use mapping::{DEFAULT_MAPPINGS, FileMapping, MapDest, MapRoot, MapRoots, apply_mappings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxLayout {
    pub work_dir: PathBuf,
    /// `<work_dir>/kernel/sched/mod`
    pub mod_path: PathBuf,
    /// `<work_dir>/working`
    pub tmp_dir: PathBuf,
}

impl SandboxLayout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            mod_path: work_dir.join("kernel").join("sched").join("mod"),
            tmp_dir: work_dir.join("working"),
            work_dir,
        }
    }

    pub fn exists(&self) -> bool {
        self.work_dir.is_dir()
    }

    /// Where each run input is seeded inside the sandbox.
    pub fn seeded_inputs(&self) -> KernelInputs {
        KernelInputs {
            vmlinux: self.work_dir.join("vmlinux"),
            symvers: self.work_dir.join("Module.symvers"),
            config: self.work_dir.join(".config"),
            makefile: self.work_dir.join("Makefile"),
        }
    }
}

/// Mirror the kernel tree into the work dir and create the module and
/// scratch directories.
pub fn create_sandbox(kernel_src: &Path, layout: &SandboxLayout) -> Result<MirrorStats> {
    let stats = fsops::mirror_tree(kernel_src, &layout.work_dir)?;
    fsops::ensure_dir(&layout.mod_path)?;
    fsops::ensure_dir(&layout.tmp_dir)?;
    tracing::info!(
        work_dir = %layout.work_dir.display(),
        copied = stats.copied,
        unchanged = stats.unchanged,
        removed = stats.removed,
        "mirrored kernel tree"
    );
    Ok(stats)
}

/// Copy the run inputs to their fixed sandbox paths, replacing whatever the
/// mirror put there.
pub fn seed_inputs(inputs: &KernelInputs, layout: &SandboxLayout) -> Result<()> {
    let dst = layout.seeded_inputs();
    let pairs = [
        (&inputs.symvers, &dst.symvers),
        (&inputs.config, &dst.config),
        (&inputs.makefile, &dst.makefile),
        (&inputs.vmlinux, &dst.vmlinux),
    ];
    for (src, out) in pairs {
        if src == out {
            continue;
        }
        fsops::copy_file(src, out)?;
    }
    Ok(())
}
