#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use schedmod_builder::app::{self, RunRequest};
use schedmod_builder::config::ConfigDoc;
use schedmod_builder::executor::{ChannelSink, ExecEvent};

pub const NEW_CORE: &str = "static void __sched notrace\n\
__attribute__((optimize(\"no-omit-frame-pointer\")))\n\
__schedule(bool preempt)\n{\n}\n";

pub const OLD_CORE: &str = "static void __sched notrace __schedule(bool preempt)\n{\n}\n";

pub const BOUNDARY: &str = "\
mod_files:
  - kernel/sched/core.c
  - kernel/sched/sched.h
sidecar:
  - [psi_task_change, kernel/sched/psi.c]
function:
  interface: [schedule]
";

pub fn write(p: &Path, body: &str) {
    fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
    fs::write(p, body).expect("write");
}

pub fn script(p: &Path, body: &str) {
    write(p, &format!("#!/bin/sh\n{body}"));
    fs::set_permissions(p, fs::Permissions::from_mode(0o755)).expect("chmod");
}

pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub tool_root: PathBuf,
    pub kernel_src: PathBuf,
    pub work_dir: PathBuf,
    pub make_log: PathBuf,
    pub patch_log: PathBuf,
    pub config: PathBuf,
}

impl Fixture {
    pub fn mod_path(&self) -> PathBuf {
        self.work_dir.join("kernel/sched/mod")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.work_dir.join("working")
    }

    pub fn read_log(p: &Path) -> Vec<String> {
        fs::read_to_string(p)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn doc(&self, req: &RunRequest) -> ConfigDoc {
        app::load_doc(Some(&self.config), app::overlay(req, None).expect("overlay")).expect("doc")
    }
}

/// Install root, built kernel tree and fake `make`/`patch` that only log.
pub fn fixture(extraversion: &str, core_c: &str, patches: &[&str]) -> Fixture {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();

    let tool_root = root.join("schedmod");
    write(&tool_root.join("configs/5.10-100/boundary.yaml"), "mod_files: []\n");
    let profile = tool_root.join("configs/5.10.134-13");
    write(&profile.join("boundary.yaml"), BOUNDARY);
    write(&profile.join("scheduler.spec"), "Name: scheduler-xxx\n");
    for p in patches {
        write(&profile.join(p), &format!("# {p}\n--- a/x\n+++ b/x\n"));
    }
    write(&tool_root.join("boundary/sched_boundary.py"), "# boundary analysis\n");
    write(&tool_root.join("tools/symbol_resolve"), "ELF\n");
    script(
        &tool_root.join("tools/springboard_search.sh"),
        "echo \"SPRINGBOARD_ARGS := $*\"\n",
    );
    write(&tool_root.join("src/Makefile.plugsched"), "collect:\n");
    write(&tool_root.join("src/Makefile"), "obj-m += scheduler.o\n");
    write(&tool_root.join("src/scheduler.lds"), "SECTIONS {}\n");
    write(&tool_root.join("src/.gitignore"), "*.o\n");
    write(&tool_root.join("src/core.c"), core_c);
    write(&tool_root.join("src/head_jump.h"), "#pragma once\n");
    write(&tool_root.join("module-contrib/readme.txt"), "contrib\n");

    let kernel_src = root.join("linux");
    write(
        &kernel_src.join("Makefile"),
        &format!(
            "# SPDX-License-Identifier: GPL-2.0\nVERSION = 5\nPATCHLEVEL = 10\nSUBLEVEL = 134\nEXTRAVERSION = {extraversion}\nNAME = Dare mighty things\n"
        ),
    );
    write(&kernel_src.join("vmlinux"), "ELF vmlinux\n");
    write(&kernel_src.join(".config"), "CONFIG_SMP=y\n");
    write(&kernel_src.join("Module.symvers"), "0x0\tschedule\tvmlinux\tEXPORT_SYMBOL\n");
    write(&kernel_src.join("kernel/sched/core.c"), "int core;\n");
    write(&kernel_src.join(".git/HEAD"), "ref: refs/heads/main\n");

    let bin = root.join("bin");
    let make_log = root.join("make.log");
    let patch_log = root.join("patch.log");
    script(
        &bin.join("make"),
        &format!("echo \"$*\" >> '{}'\n", make_log.display()),
    );
    script(
        &bin.join("patch"),
        &format!(
            "echo \"$* $(head -n 1)\" >> '{}'\n",
            patch_log.display()
        ),
    );

    let config = root.join("schedmod.toml");
    write(
        &config,
        &format!(
            "[tool]\nroot = \"{}\"\n\n[tools]\nmake = \"{}\"\npatch = \"{}\"\njobs = 3\n",
            tool_root.display(),
            bin.join("make").display(),
            bin.join("patch").display()
        ),
    );

    Fixture {
        work_dir: root.join("work"),
        tmp,
        tool_root,
        kernel_src,
        make_log,
        patch_log,
        config,
    }
}

/// Run a document through the real planner and executor, collecting events.
pub fn execute(doc: &ConfigDoc, dry_run: bool) -> (schedmod_builder::Result<()>, Vec<ExecEvent>) {
    let (tx, rx) = mpsc::channel();
    let res = app::execute(doc, dry_run, Arc::new(ChannelSink::new(tx)));
    (res, rx.try_iter().collect())
}

pub fn log_lines(events: &[ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ExecEvent::TaskLog { line, .. } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

pub fn started(events: &[ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ExecEvent::TaskStarted { id } => Some(id.clone()),
            _ => None,
        })
        .collect()
}
