use std::path::PathBuf;

use serde_json::json;

use crate::error::Result;
use crate::fsops;
use crate::kernel::KernelIdentity;
use crate::pipeline::PipelineDriver;
use crate::profile::{BoundaryConfig, ConfigProfile};
use crate::sandbox::SandboxLayout;

pub const RUN_MANIFEST: &str = "schedmod-manifest.json";

pub struct RunRecord<'a> {
    pub layout: &'a SandboxLayout,
    pub identity: &'a KernelIdentity,
    pub profile: &'a ConfigProfile,
    pub boundary: &'a BoundaryConfig,
    pub driver: &'a PipelineDriver,
}

/// Describe a finished extraction next to its scratch files.
pub fn write_run_manifest(rec: &RunRecord<'_>) -> Result<PathBuf> {
    let manifest = json!({
        "kernel": {
            "uname_r": rec.identity.uname_r(),
            "major": rec.identity.major,
            "full": rec.identity.full,
            "release": rec.identity.release,
            "arch": rec.identity.arch,
        },
        "profile": {
            "name": rec.profile.name,
            "dir": rec.profile.dir.display().to_string(),
        },
        "sandbox": rec.layout,
        "module_sources": rec.boundary.module_sources(),
        "module_headers": rec.boundary.module_headers(),
        "sidecar_objects": rec.boundary.sidecar_objects(),
        "extraction_objects": rec.driver.state().objs,
        "patches_applied": rec.driver.applied_patches(),
        "old_springboard_fix": rec.driver.legacy_fix(),
        "stage": rec.driver.stage(),
        "generated_at": chrono::Utc::now().to_rfc3339(),
    });
    let path = rec.layout.tmp_dir.join(RUN_MANIFEST);
    fsops::write_json_pretty(&path, &manifest)?;
    Ok(path)
}
