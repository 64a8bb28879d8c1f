use schedmod_builder_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::executor::ExecCtx;
use crate::manifest::{RunRecord, write_run_manifest};
use crate::modules::util::with_driver;
use crate::pipeline::FinalizeInputs;
use crate::Result;

step_config!(
    #[Task(
        id = "extract.pre-patch",
        module = "extract",
        phase = "extract",
        after = ["sandbox:ready"],
        default_label = "Apply pre-extract patch"
    )]
    PrePatchStep
);

impl PrePatchStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        with_driver(ctx, |d, ctx| d.pre_patch(ctx))
    }
}

step_config!(
    #[Task(
        id = "extract.run",
        module = "extract",
        phase = "extract",
        after = ["extract.pre-patch"],
        default_label = "Extract scheduler module"
    )]
    RunStep
);

impl RunStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        with_driver(ctx, |d, ctx| d.extract(ctx))
    }
}

step_config!(
    #[Task(
        id = "extract.post-patch",
        module = "extract",
        phase = "extract",
        after = ["extract.run"],
        default_label = "Apply post-extract patch"
    )]
    PostPatchStep
);

impl PostPatchStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        with_driver(ctx, |d, ctx| d.post_patch(ctx))
    }
}

step_config!(
    #[Task(
        id = "extract.springboard",
        module = "extract",
        phase = "extract",
        after = ["extract.post-patch"],
        default_label = "Apply dynamic springboard patch"
    )]
    SpringboardStep
);

impl SpringboardStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        with_driver(ctx, |d, ctx| d.springboard_patch(ctx))
    }
}

step_config!(
    #[Task(
        id = "extract.springboard-legacy",
        module = "extract",
        phase = "extract",
        after = ["extract.springboard"],
        default_label = "Check for old springboard layout"
    )]
    LegacySpringboardStep
);

impl LegacySpringboardStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let needed = with_driver(ctx, |d, ctx| d.legacy_springboard_patch(ctx))?;
        if !needed {
            ctx.log("springboard layout is current; no second patch needed");
        }
        Ok(())
    }
}

step_config!(
    #[Task(
        id = "extract.finalize",
        module = "extract",
        phase = "finalize",
        after = ["extract.springboard-legacy"],
        provides = ["extract:finalized"],
        default_label = "Discover springboard"
    )]
    FinalizeStep
);

impl FinalizeStep {
    fn run(_cfg: &Self, _doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let paths = ctx.tool_paths()?;
        let inputs = ctx.run_state()?.require_inputs()?;
        let script = paths.springboard_search();
        with_driver(ctx, |d, ctx| {
            d.finalize(
                ctx,
                &FinalizeInputs {
                    script: &script,
                    vmlinux: &inputs.vmlinux,
                    config: &inputs.config,
                },
            )
        })?;

        let state = ctx.run_state()?;
        let layout = state.require_layout()?;
        let manifest = write_run_manifest(&RunRecord {
            layout: &layout,
            identity: &state.require_identity()?,
            profile: &state.require_profile()?,
            boundary: &state.require_boundary()?,
            driver: &state.require_driver()?,
        })?;
        ctx.log(&format!("wrote {}", manifest.display()));
        ctx.log(&format!(
            "scheduler module ready in {}",
            layout.mod_path.display()
        ));
        Ok(())
    }
}

#[Module(
    id = "extract",
    modes = ["init", "dev-init"],
    tasks = [
        PrePatchStep,
        RunStep,
        PostPatchStep,
        SpringboardStep,
        LegacySpringboardStep,
        FinalizeStep
    ]
)]
pub struct ExtractModule;
