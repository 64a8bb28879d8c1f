use schedmod_builder_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::executor::ExecCtx;
use crate::modules::util;
use crate::pipeline::PipelineDriver;
use crate::sandbox::{DEFAULT_MAPPINGS, MapRoots, SandboxLayout, apply_mappings, create_sandbox, seed_inputs};
use crate::Result;

step_config!(
    #[Task(
        id = "sandbox.create",
        module = "sandbox",
        phase = "sandbox",
        after = ["kernel:profile"],
        provides = ["sandbox:tree"],
        default_label = "Mirror kernel tree"
    )]
    CreateStep
);

impl CreateStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let run = doc.run()?;
        let kernel_src = run.kernel_src()?;
        let layout = SandboxLayout::new(run.work_dir()?);
        ctx.log(&format!(
            "creating mod build directory structure in {}",
            layout.work_dir.display()
        ));
        let stats = create_sandbox(&kernel_src, &layout)?;
        ctx.log(&format!(
            "mirrored {}: {} copied, {} unchanged, {} removed",
            kernel_src.display(),
            stats.copied,
            stats.unchanged,
            stats.removed
        ));
        ctx.update_run_state(|s| s.layout = Some(layout))
    }
}

step_config!(
    #[Task(
        id = "sandbox.overlay",
        module = "sandbox",
        phase = "sandbox",
        after = ["sandbox:tree"],
        provides = ["sandbox:assets"],
        default_label = "Overlay tool assets"
    )]
    OverlayStep
);

impl OverlayStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let paths = ctx.tool_paths()?;
        let state = ctx.run_state()?;
        let layout = state.require_layout()?;
        let profile = state.require_profile()?;
        let roots = MapRoots {
            tool_root: &paths.root,
            profile_dir: &profile.dir,
        };
        let placed = apply_mappings(DEFAULT_MAPPINGS, &roots, &layout)?;
        ctx.log(&format!(
            "placed {placed} assets from {} and {}",
            paths.root.display(),
            profile.dir.display()
        ));
        Ok(())
    }
}

step_config!(
    #[Task(
        id = "sandbox.seed",
        module = "sandbox",
        phase = "sandbox",
        after = ["sandbox:assets"],
        provides = ["sandbox:ready"],
        default_label = "Seed kernel inputs"
    )]
    SeedStep
);

impl SeedStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let state = ctx.run_state()?;
        let layout = state.require_layout()?;
        let inputs = state.require_inputs()?;
        let boundary = state.require_boundary()?;
        seed_inputs(&inputs, &layout)?;
        ctx.log(&format!(
            "seeded Module.symvers, .config, Makefile and vmlinux into {}",
            layout.work_dir.display()
        ));

        let driver = PipelineDriver::new(&layout, boundary.extraction_objects(), util::tools_config(doc)?);
        ctx.update_run_state(|s| s.driver = Some(driver))
    }
}

#[Module(
    id = "sandbox",
    modes = ["init", "dev-init"],
    tasks = [CreateStep, OverlayStep, SeedStep]
)]
pub struct SandboxModule;
