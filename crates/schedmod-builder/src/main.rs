use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use schedmod_builder::Result;
use schedmod_builder::app::{self, RunRequest};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Tool configuration TOML (may `extends` a base file)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Install root holding configs/, src/, tools/ (default: binary's directory)
    #[arg(long, global = true)]
    tool_root: Option<PathBuf>,
    /// More diagnostics on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Args)]
struct RunOpts {
    /// Run resolution steps only; report what mutating steps would do
    #[arg(long)]
    dry_run: bool,
    /// Print the ordered task plan instead of executing it
    #[arg(long)]
    plan: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize a scheduler module sandbox for an installed release kernel
    Init {
        /// `uname -r` of the target kernel
        release: String,
        /// Kernel source tree matching the release
        kernel_src: PathBuf,
        /// Sandbox directory to create
        work_dir: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Initialize a sandbox from a built developer kernel tree
    DevInit {
        kernel_src: PathBuf,
        work_dir: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Build the scheduler module RPM from an initialized sandbox
    Build {
        work_dir: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Mirror a kernel source tree into a target directory
    ExtractSrc {
        kernel_src: PathBuf,
        target_dir: PathBuf,
        /// Git ref to check out in the source tree first
        #[arg(long)]
        checkout: Option<String>,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Print the effective configuration (after extends) as TOML
    Resolve,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.kind().exit_code())
        }
    }
}

fn dispatch(args: Args) -> Result<()> {
    let config = args.config.as_deref();
    let tool_root = args.tool_root.as_deref();
    match args.cmd {
        Command::Init {
            release,
            kernel_src,
            work_dir,
            opts,
        } => cmd_run(
            config,
            tool_root,
            &RunRequest::init(&release, &kernel_src, &work_dir),
            &opts,
        ),
        Command::DevInit {
            kernel_src,
            work_dir,
            opts,
        } => cmd_run(
            config,
            tool_root,
            &RunRequest::dev_init(&kernel_src, &work_dir),
            &opts,
        ),
        Command::Build { work_dir, opts } => {
            cmd_run(config, tool_root, &RunRequest::build(&work_dir), &opts)
        }
        Command::ExtractSrc {
            kernel_src,
            target_dir,
            checkout,
            opts,
        } => cmd_run(
            config,
            tool_root,
            &RunRequest::extract_src(&kernel_src, &target_dir, checkout.as_deref()),
            &opts,
        ),
        Command::Resolve => cmd_resolve(config, tool_root),
    }
}

fn cmd_resolve(config: Option<&Path>, tool_root: Option<&Path>) -> Result<()> {
    let doc = app::load_doc(config, app::tool_overlay(tool_root))?;
    print!("{}", app::resolve_text(&doc)?);
    Ok(())
}

fn cmd_run(
    config: Option<&Path>,
    tool_root: Option<&Path>,
    req: &RunRequest,
    opts: &RunOpts,
) -> Result<()> {
    let doc = app::load_doc(config, app::overlay(req, tool_root)?)?;
    tracing::debug!(config = %doc.path.display(), mode = req.mode, "loaded configuration");

    if opts.plan {
        let plan = app::plan(&doc)?;
        for (i, task) in plan.ordered()?.iter().enumerate() {
            println!(
                "{:>2}. {:<28}  {:<8} {:<9}  {}",
                i + 1,
                task.id,
                task.module,
                task.phase,
                task.label
            );
        }
        return Ok(());
    }

    let sink = Arc::new(schedmod_builder::executor::StdoutSink::default());
    app::execute(&doc, opts.dry_run, sink)
}
