use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_debuginfo_root() -> String {
    "/usr/lib/debug/lib/modules".into()
}

fn default_devel_root() -> String {
    "/usr/src/kernels".into()
}

/// Where release packages install kernel artifacts (`[kernel]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelLayoutConfig {
    #[serde(default = "default_debuginfo_root")]
    pub debuginfo_root: String,
    #[serde(default = "default_devel_root")]
    pub devel_root: String,
}

impl Default for KernelLayoutConfig {
    fn default() -> Self {
        Self {
            debuginfo_root: default_debuginfo_root(),
            devel_root: default_devel_root(),
        }
    }
}

/// The four per-run artifacts extraction needs from the target build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelInputs {
    pub vmlinux: PathBuf,
    pub symvers: PathBuf,
    pub config: PathBuf,
    pub makefile: PathBuf,
}

impl KernelInputs {
    fn in_dir(dir: &Path, vmlinux: PathBuf) -> Self {
        Self {
            vmlinux,
            symvers: dir.join("Module.symvers"),
            config: dir.join(".config"),
            makefile: dir.join("Makefile"),
        }
    }
}

/// Installed release kernel: debug image from the debuginfo package, the
/// rest from the devel package.
pub fn release_inputs(layout: &KernelLayoutConfig, release: &str) -> Result<KernelInputs> {
    let release = release.trim();
    if release.is_empty() || release.contains('/') {
        return Err(Error::precondition(format!(
            "invalid kernel release '{release}' (expected `uname -r` output)"
        )));
    }
    let vmlinux = Path::new(&layout.debuginfo_root)
        .join(release)
        .join("vmlinux");
    let devel = Path::new(&layout.devel_root).join(release);
    let inputs = KernelInputs::in_dir(&devel, vmlinux);

    if !inputs.vmlinux.is_file() {
        return Err(Error::precondition(format!(
            "{} not found, please install kernel-debuginfo-{release}.rpm",
            inputs.vmlinux.display()
        )));
    }
    if !inputs.config.is_file() {
        return Err(Error::precondition(format!(
            "{} not found, please install kernel-devel-{release}.rpm",
            inputs.config.display()
        )));
    }
    Ok(inputs)
}

/// Developer build tree: everything comes from the tree itself, which must
/// already be built.
pub fn dev_inputs(kernel_src: &Path, jobs: usize) -> Result<KernelInputs> {
    if !kernel_src.is_dir() {
        return Err(Error::precondition(format!(
            "kernel source directory {} does not exist",
            kernel_src.display()
        )));
    }
    let inputs = KernelInputs::in_dir(kernel_src, kernel_src.join("vmlinux"));
    if !inputs.vmlinux.is_file() {
        return Err(Error::precondition(format!(
            "{} not found, please run `make -j {jobs}` in {} first",
            inputs.vmlinux.display(),
            kernel_src.display()
        )));
    }
    if !inputs.config.is_file() {
        return Err(Error::precondition(format!(
            "kernel config {} not found",
            inputs.config.display()
        )));
    }
    Ok(inputs)
}

/// An initialised sandbox carries its own copies of the inputs.
pub fn sandbox_inputs(work_dir: &Path) -> Result<KernelInputs> {
    if !work_dir.is_dir() {
        return Err(Error::precondition(format!(
            "can't find sandbox {}; run init or dev-init first",
            work_dir.display()
        )));
    }
    Ok(KernelInputs::in_dir(work_dir, work_dir.join("vmlinux")))
}
