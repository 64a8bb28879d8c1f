use schedmod_builder_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::error::Error;
use crate::executor::ExecCtx;
use crate::modules::util;
use crate::package::{
    collect_packages, prepare_rpm_root, require_sandbox, rpm_root, rpmbuild_command,
    write_package_manifest,
};
use crate::sandbox::SandboxLayout;
use crate::Result;

step_config!(
    #[Task(
        id = "package.prepare",
        module = "package",
        phase = "package",
        after = ["kernel:profile"],
        provides = ["package:root"],
        default_label = "Prepare rpmbuild tree"
    )]
    PrepareStep
);

impl PrepareStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let layout = SandboxLayout::new(doc.run()?.work_dir()?);
        require_sandbox(&layout)?;
        ctx.log("preparing rpmbuild environment");
        let root = prepare_rpm_root(&layout, &util::package_config(doc)?)?;
        ctx.log(&format!("rpmbuild root = {}", root.display()));
        ctx.update_run_state(|s| s.layout = Some(layout))
    }
}

step_config!(
    #[Task(
        id = "package.rpm",
        module = "package",
        phase = "package",
        after = ["package:root"],
        provides = ["package:rpms"],
        default_label = "Build scheduler RPM"
    )]
    RpmStep
);

impl RpmStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let state = ctx.run_state()?;
        let layout = state.require_layout()?;
        let identity = state.require_identity()?;
        let boundary = state.require_boundary()?;
        let cfg = util::package_config(doc)?;
        let root = rpm_root(&layout);
        let root = root
            .canonicalize()
            .map_err(|e| Error::process(format!("failed to resolve {}: {e}", root.display())))?;

        let cmd = rpmbuild_command(
            &util::tools_config(doc)?,
            &cfg,
            &layout,
            &root,
            &identity,
            &boundary.sidecar_objects(),
        );
        ctx.run_command(&cmd)?;

        let packages = collect_packages(&root)?;
        for p in &packages {
            ctx.log(&format!("built {} ({} bytes)", p.path.display(), p.size));
        }
        let manifest = write_package_manifest(&root, &identity, &packages)?;
        ctx.log(&format!("wrote {}", manifest.display()));
        Ok(())
    }
}

#[Module(
    id = "package",
    modes = ["build"],
    tasks = [PrepareStep, RpmStep]
)]
pub struct PackageModule;
