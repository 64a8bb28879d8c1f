use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

fn default_make() -> String {
    "make".into()
}
fn default_patch() -> String {
    "patch".into()
}
fn default_rpmbuild() -> String {
    "rpmbuild".into()
}
fn default_git() -> String {
    "git".into()
}
fn default_extract_makefile() -> String {
    "Makefile.plugsched".into()
}

/// `[tools]`: external programs and build parallelism.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    #[serde(default = "default_make")]
    pub make: String,
    #[serde(default = "default_patch")]
    pub patch: String,
    #[serde(default = "default_rpmbuild")]
    pub rpmbuild: String,
    #[serde(default = "default_git")]
    pub git: String,
    /// Parallel jobs for the extraction makefile; 0 means one per CPU.
    pub jobs: usize,
    /// Extraction makefile name inside the scratch directory.
    #[serde(default = "default_extract_makefile")]
    pub extract_makefile: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            make: default_make(),
            patch: default_patch(),
            rpmbuild: default_rpmbuild(),
            git: default_git(),
            jobs: 0,
            extract_makefile: default_extract_makefile(),
        }
    }
}

impl ToolsConfig {
    pub fn jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }
}

/// One external program invocation, fully described before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Short name used in logs, e.g. `make collect`.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// File fed to the program's stdin.
    pub stdin: Option<PathBuf>,
    /// File the program's stdout is appended to instead of the log.
    pub stdout_append: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn new(label: impl Into<String>, program: impl Into<String>, cwd: &Path) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            stdin: None,
            stdout_append: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn stdin_from(mut self, p: impl Into<PathBuf>) -> Self {
        self.stdin = Some(p.into());
        self
    }

    pub fn stdout_to(mut self, p: impl Into<PathBuf>) -> Self {
        self.stdout_append = Some(p.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            if a.is_empty() || a.contains(char::is_whitespace) {
                write!(f, " '{a}'")?;
            } else {
                write!(f, " {a}")?;
            }
        }
        if let Some(p) = &self.stdin {
            write!(f, " < {}", p.display())?;
        }
        if let Some(p) = &self.stdout_append {
            write!(f, " >> {}", p.display())?;
        }
        Ok(())
    }
}

/// Executes external stages. The executor runs real subprocesses; tests
/// record the invocations instead.
pub trait ToolRunner {
    fn run_tool(&mut self, cmd: &ToolCommand) -> Result<()>;

    /// Progress line for the operator.
    fn note(&mut self, _line: &str) {}
}

/// Sub-stages of extraction, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStage {
    OldDefConfig,
    Collect,
    Analyze,
    Extract,
}

impl ExtractStage {
    pub const SEQUENCE: [ExtractStage; 4] = [
        ExtractStage::OldDefConfig,
        ExtractStage::Collect,
        ExtractStage::Analyze,
        ExtractStage::Extract,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractStage::OldDefConfig => "olddefconfig",
            ExtractStage::Collect => "collect",
            ExtractStage::Analyze => "analyze",
            ExtractStage::Extract => "extract",
        }
    }
}

/// Builds the command line for each external stage.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    pub tools: &'a ToolsConfig,
    pub work_dir: &'a Path,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(tools: &'a ToolsConfig, work_dir: &'a Path) -> Self {
        Self { tools, work_dir }
    }

    /// `make <stage>` for one extraction sub-stage. Only the final stage
    /// gets the object list; the others see an empty `objs=`.
    pub fn extract_stage(
        &self,
        stage: ExtractStage,
        tmp_dir: &Path,
        mod_path: &Path,
        objs: &[String],
    ) -> ToolCommand {
        let cmd = ToolCommand::new(
            format!("make {}", stage.as_str()),
            &self.tools.make,
            self.work_dir,
        );
        if stage == ExtractStage::OldDefConfig {
            return cmd.arg("olddefconfig");
        }
        let objs = if stage == ExtractStage::Extract {
            objs.join(" ")
        } else {
            String::new()
        };
        cmd.arg(stage.as_str())
            .arg(format!("objs={objs}"))
            .arg(format!("plugsched_tmpdir={}", dir_arg(tmp_dir)))
            .arg(format!("plugsched_modpath={}", dir_arg(mod_path)))
            .arg(format!(
                "--file={}",
                tmp_dir.join(&self.tools.extract_makefile).display()
            ))
            .arg(format!("--jobs={}", self.tools.jobs()))
    }

    pub fn patch(&self, patch_file: &Path) -> ToolCommand {
        let name = patch_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        ToolCommand::new(format!("patch {name}"), &self.tools.patch, self.work_dir)
            .arg("-p1")
            .stdin_from(patch_file)
    }

    /// Springboard discovery; its stdout extends the module Makefile.
    pub fn springboard_init(
        &self,
        script: &Path,
        vmlinux: &Path,
        config: &Path,
        mod_makefile: &Path,
    ) -> ToolCommand {
        ToolCommand::new(
            "springboard_search init",
            script.display().to_string(),
            self.work_dir,
        )
        .arg("init")
        .arg(vmlinux.display().to_string())
        .arg(config.display().to_string())
        .stdout_to(mod_makefile)
    }

    pub fn rpmbuild(
        &self,
        rpm_root: &Path,
        sidecar_objs: &[String],
        kver: &str,
        krel: &str,
        spec_name: &str,
    ) -> ToolCommand {
        ToolCommand::new("rpmbuild", &self.tools.rpmbuild, rpm_root)
            .arg("--define")
            .arg(format!("%_topdir {}", rpm_root.display()))
            .arg("--define")
            .arg(format!("%_builddir {}", self.work_dir.display()))
            .arg("--define")
            .arg(format!("%_sdcrobjs \"{}\"", sidecar_objs.join(" ")))
            .arg("--define")
            .arg(format!("%KVER {kver}"))
            .arg("--define")
            .arg(format!("%KREL {krel}"))
            .arg("-bb")
            .arg(format!("SPECS/{spec_name}"))
    }

    pub fn git_checkout(&self, git_ref: &str) -> ToolCommand {
        ToolCommand::new(format!("git checkout {git_ref}"), &self.tools.git, self.work_dir)
            .arg("checkout")
            .arg(git_ref)
    }
}

// Directory arguments keep a trailing slash; the extraction makefile
// concatenates file names onto them.
fn dir_arg(p: &Path) -> String {
    let s = p.display().to_string();
    if s.ends_with('/') { s } else { format!("{s}/") }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> ToolsConfig {
        ToolsConfig {
            jobs: 8,
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn extract_stage_command_lines() {
        let t = tools();
        let b = CommandBuilder::new(&t, Path::new("/w"));
        let objs = vec!["kernel/sched/core.c.extract".to_string()];

        let c = b.extract_stage(
            ExtractStage::OldDefConfig,
            Path::new("/w/working"),
            Path::new("/w/kernel/sched/mod"),
            &objs,
        );
        assert_eq!(c.to_string(), "make olddefconfig");

        let c = b.extract_stage(
            ExtractStage::Collect,
            Path::new("/w/working"),
            Path::new("/w/kernel/sched/mod"),
            &objs,
        );
        assert_eq!(
            c.args,
            vec![
                "collect",
                "objs=",
                "plugsched_tmpdir=/w/working/",
                "plugsched_modpath=/w/kernel/sched/mod/",
                "--file=/w/working/Makefile.plugsched",
                "--jobs=8",
            ]
        );

        let c = b.extract_stage(
            ExtractStage::Extract,
            Path::new("/w/working"),
            Path::new("/w/kernel/sched/mod"),
            &objs,
        );
        assert_eq!(c.args[1], "objs=kernel/sched/core.c.extract");
        assert_eq!(c.cwd, PathBuf::from("/w"));
    }

    #[test]
    fn zero_jobs_means_cpu_count() {
        assert!(ToolsConfig::default().jobs() >= 1);
        assert_eq!(tools().jobs(), 8);
    }

    #[test]
    fn rpmbuild_defines() {
        let t = tools();
        let b = CommandBuilder::new(&t, Path::new("/w"));
        let c = b.rpmbuild(
            Path::new("/w/working/rpmbuild"),
            &["kernel/sched/cpuacct.o".to_string(), "kernel/sched/psi.o".to_string()],
            "5.10.134",
            "13.an8",
            "scheduler.spec",
        );
        assert_eq!(c.cwd, PathBuf::from("/w/working/rpmbuild"));
        assert_eq!(
            c.args,
            vec![
                "--define",
                "%_topdir /w/working/rpmbuild",
                "--define",
                "%_builddir /w",
                "--define",
                "%_sdcrobjs \"kernel/sched/cpuacct.o kernel/sched/psi.o\"",
                "--define",
                "%KVER 5.10.134",
                "--define",
                "%KREL 13.an8",
                "-bb",
                "SPECS/scheduler.spec",
            ]
        );
    }

    #[test]
    fn patch_and_springboard_redirections() {
        let t = tools();
        let b = CommandBuilder::new(&t, Path::new("/w"));
        let p = b.patch(Path::new("/w/working/post_extract.patch"));
        assert_eq!(p.to_string(), "patch -p1 < /w/working/post_extract.patch");
        assert_eq!(p.label, "patch post_extract.patch");

        let s = b.springboard_init(
            Path::new("/opt/t/tools/springboard_search.sh"),
            Path::new("/k/vmlinux"),
            Path::new("/k/.config"),
            Path::new("/w/kernel/sched/mod/Makefile"),
        );
        assert_eq!(
            s.to_string(),
            "/opt/t/tools/springboard_search.sh init /k/vmlinux /k/.config >> /w/kernel/sched/mod/Makefile"
        );
    }
}
