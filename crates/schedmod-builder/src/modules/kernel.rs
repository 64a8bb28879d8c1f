use schedmod_builder_macros::{Module, Task};

use crate::config::{ConfigDoc, RunMode};
use crate::executor::ExecCtx;
use crate::kernel::inputs::{dev_inputs, release_inputs, sandbox_inputs};
use crate::kernel::resolve_identity;
use crate::modules::util;
use crate::profile::select_profile;
use crate::Result;

step_config!(
    #[Task(
        id = "kernel.inputs",
        module = "kernel",
        phase = "resolve",
        after = ["core.init"],
        provides = ["kernel:inputs"],
        default_label = "Locate kernel inputs",
        read_only = true
    )]
    InputsStep
);

impl InputsStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let run = doc.run()?;
        let inputs = match run.mode {
            RunMode::Init => {
                let layout = util::kernel_layout(doc)?;
                release_inputs(&layout, run.require("release", &run.release)?)?
            }
            RunMode::DevInit => {
                let jobs = util::tools_config(doc)?.jobs();
                dev_inputs(&run.kernel_src()?, jobs)?
            }
            _ => sandbox_inputs(&run.work_dir()?)?,
        };
        ctx.log(&format!("vmlinux = {}", inputs.vmlinux.display()));
        ctx.log(&format!("config = {}", inputs.config.display()));
        ctx.log(&format!("makefile = {}", inputs.makefile.display()));
        ctx.update_run_state(|s| s.inputs = Some(inputs))
    }
}

step_config!(
    #[Task(
        id = "kernel.resolve",
        module = "kernel",
        phase = "resolve",
        after = ["kernel:inputs"],
        provides = ["kernel:identity"],
        default_label = "Resolve kernel version",
        read_only = true
    )]
    ResolveStep
);

impl ResolveStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let inputs = ctx.run_state()?.require_inputs()?;
        let identity = resolve_identity(&inputs.makefile)?;
        ctx.log(&format!(
            "kernel {} (major {}, release {}, arch {})",
            identity.uname_r(),
            identity.major,
            identity.release,
            identity.arch.as_deref().unwrap_or("-")
        ));
        ctx.update_run_state(|s| s.identity = Some(identity))
    }
}

step_config!(
    #[Task(
        id = "kernel.profile",
        module = "kernel",
        phase = "resolve",
        after = ["kernel:identity"],
        provides = ["kernel:profile"],
        default_label = "Select configuration profile",
        read_only = true
    )]
    ProfileStep
);

impl ProfileStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let paths = ctx.tool_paths()?;
        let identity = ctx.run_state()?.require_identity()?;
        let profile = select_profile(&paths.configs_dir, &identity)?;
        let boundary = profile.load_boundary()?;
        ctx.log(&format!("choose config dir {}/", profile.dir.display()));
        ctx.log(&format!(
            "boundary: {} module sources, {} headers, {} sidecars",
            boundary.module_sources().len(),
            boundary.module_headers().len(),
            boundary.sidecar.len()
        ));
        ctx.update_run_state(|s| {
            s.profile = Some(profile);
            s.boundary = Some(boundary);
        })
    }
}

#[Module(
    id = "kernel",
    modes = ["init", "dev-init", "build"],
    tasks = [InputsStep, ResolveStep, ProfileStep]
)]
pub struct KernelModule;
