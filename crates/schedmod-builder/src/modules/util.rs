use crate::config::ConfigDoc;
use crate::error::Result;
use crate::executor::ExecCtx;
use crate::kernel::KernelLayoutConfig;
use crate::package::PackageConfig;
use crate::pipeline::{PipelineDriver, ToolsConfig};

pub fn tools_config(doc: &ConfigDoc) -> Result<ToolsConfig> {
    Ok(doc.deserialize_path("tools")?.unwrap_or_default())
}

pub fn kernel_layout(doc: &ConfigDoc) -> Result<KernelLayoutConfig> {
    Ok(doc.deserialize_path("kernel")?.unwrap_or_default())
}

pub fn package_config(doc: &ConfigDoc) -> Result<PackageConfig> {
    Ok(doc.deserialize_path("package")?.unwrap_or_default())
}

/// Advance the run's pipeline driver and store it back.
pub fn with_driver<T>(
    ctx: &mut ExecCtx,
    f: impl FnOnce(&mut PipelineDriver, &mut ExecCtx) -> Result<T>,
) -> Result<T> {
    let mut driver = ctx.run_state()?.require_driver()?;
    let out = f(&mut driver, ctx)?;
    ctx.update_run_state(|s| s.driver = Some(driver))?;
    Ok(out)
}
