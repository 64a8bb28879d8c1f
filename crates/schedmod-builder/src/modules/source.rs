use std::path::PathBuf;

use schedmod_builder_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::error::Error;
use crate::executor::ExecCtx;
use crate::fsops;
use crate::modules::util;
use crate::pipeline::CommandBuilder;
use crate::Result;

step_config!(
    #[Task(
        id = "source.checkout",
        module = "source",
        phase = "source",
        after = ["core.init"],
        provides = ["source:tree"],
        default_label = "Check out kernel source"
    )]
    CheckoutStep
);

impl CheckoutStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let run = doc.run()?;
        let kernel_src = run.kernel_src()?;
        if !kernel_src.is_dir() {
            return Err(Error::precondition(format!(
                "kernel source directory {} does not exist",
                kernel_src.display()
            )));
        }
        let Some(git_ref) = run.checkout.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            ctx.log("no checkout requested; mirroring the tree as is");
            return Ok(());
        };
        let tools = util::tools_config(doc)?;
        let cmd = CommandBuilder::new(&tools, &kernel_src).git_checkout(git_ref);
        ctx.run_command(&cmd)
    }
}

step_config!(
    #[Task(
        id = "source.mirror",
        module = "source",
        phase = "source",
        after = ["source:tree"],
        default_label = "Mirror kernel source"
    )]
    MirrorStep
);

impl MirrorStep {
    fn run(_cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let run = doc.run()?;
        let kernel_src = run.kernel_src()?;
        let target = PathBuf::from(run.require("target_dir", &run.target_dir)?);
        let stats = fsops::mirror_tree(&kernel_src, &target)?;
        ctx.log(&format!(
            "mirrored {} -> {}: {} copied, {} unchanged, {} removed",
            kernel_src.display(),
            target.display(),
            stats.copied,
            stats.unchanged,
            stats.removed
        ));
        Ok(())
    }
}

#[Module(
    id = "source",
    modes = ["extract-src"],
    tasks = [CheckoutStep, MirrorStep]
)]
pub struct SourceModule;
