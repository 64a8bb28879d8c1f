#![cfg(unix)]

mod support;

use std::fs;

use schedmod_builder::ErrorKind;
use schedmod_builder::app::RunRequest;
use schedmod_builder::executor::ExecEvent;
use support::{Fixture, NEW_CORE, OLD_CORE, fixture};

const ALL_PATCHES: &[&str] = &[
    "post_extract.patch",
    "dynamic_springboard.patch",
    "dynamic_springboard_2.patch",
];

fn manifest(f: &Fixture) -> serde_json::Value {
    let text = fs::read_to_string(f.tmp_dir().join("schedmod-manifest.json")).expect("manifest");
    serde_json::from_str(&text).expect("json")
}

#[test]
fn dev_init_builds_a_ready_sandbox() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let (res, events) = support::execute(&doc, false);
    res.expect("dev-init");

    assert!(matches!(
        events.last(),
        Some(ExecEvent::ExecutorDone { ok: true, .. })
    ));
    assert_eq!(support::started(&events).len(), 13);

    // mirrored tree without VCS metadata, plus seeded inputs
    assert_eq!(
        fs::read_to_string(f.work_dir.join("kernel/sched/core.c")).unwrap(),
        "int core;\n"
    );
    assert!(!f.work_dir.join(".git").exists());
    assert_eq!(
        fs::read_to_string(f.work_dir.join(".config")).unwrap(),
        "CONFIG_SMP=y\n"
    );
    assert!(f.work_dir.join("Module.symvers").is_file());

    // tool and profile assets
    for name in [
        "boundary.yaml",
        "scheduler.spec",
        "post_extract.patch",
        "sched_boundary.py",
        "symbol_resolve",
        "springboard_search.sh",
        "Makefile.plugsched",
        "readme.txt",
    ] {
        assert!(f.tmp_dir().join(name).is_file(), "missing {name}");
    }
    assert_eq!(
        fs::read_to_string(f.mod_path().join("core.c")).unwrap(),
        NEW_CORE
    );
    assert!(f.mod_path().join("head_jump.h").is_file());
    assert!(f.mod_path().join("scheduler.lds").is_file());
    assert!(f.work_dir.join(".gitignore").is_file());

    // springboard discovery output lands after the template Makefile
    let makefile = fs::read_to_string(f.mod_path().join("Makefile")).unwrap();
    assert_eq!(
        makefile,
        format!(
            "obj-m += scheduler.o\nSPRINGBOARD_ARGS := init {} {}\n",
            f.kernel_src.join("vmlinux").display(),
            f.kernel_src.join(".config").display()
        )
    );
}

#[test]
fn extraction_stages_run_in_order_with_the_boundary_objects() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    support::execute(&doc, false).0.expect("dev-init");

    let tmp = format!("{}/", f.tmp_dir().display());
    let modp = format!("{}/", f.mod_path().display());
    let tail = format!(
        "plugsched_tmpdir={tmp} plugsched_modpath={modp} --file={}Makefile.plugsched --jobs=3",
        tmp
    );
    assert_eq!(
        Fixture::read_log(&f.make_log),
        vec![
            "olddefconfig".to_string(),
            format!("collect objs= {tail}"),
            format!("analyze objs= {tail}"),
            format!(
                "extract objs=kernel/sched/core.c.extract kernel/sched/sched.h.extract \
                 kernel/sched/psi.c.extract {tail}"
            ),
        ]
    );

    // no pre_extract.patch in the profile, and core.c has the new layout
    assert_eq!(
        Fixture::read_log(&f.patch_log),
        vec![
            "-p1 # post_extract.patch".to_string(),
            "-p1 # dynamic_springboard.patch".to_string(),
        ]
    );

    let m = manifest(&f);
    assert_eq!(m["profile"]["name"], "5.10.134-13");
    assert_eq!(m["kernel"]["uname_r"], "5.10.134-13.an8.x86_64");
    assert_eq!(m["kernel"]["release"], "13.an8");
    assert_eq!(m["old_springboard_fix"], false);
    assert_eq!(m["stage"], "finalized");
    assert_eq!(m["sidecar_objects"][0], "kernel/sched/psi.o");
}

#[test]
fn old_kernel_layout_gets_the_second_springboard_patch() {
    let f = fixture("-13.an8.x86_64", OLD_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let (res, events) = support::execute(&doc, false);
    res.expect("dev-init");

    assert_eq!(
        Fixture::read_log(&f.patch_log).last().map(String::as_str),
        Some("-p1 # dynamic_springboard_2.patch")
    );
    assert!(
        support::log_lines(&events)
            .iter()
            .any(|l| l == "old springboard layout detected")
    );
    let m = manifest(&f);
    assert_eq!(m["old_springboard_fix"], true);
    assert_eq!(m["patches_applied"].as_array().map(Vec::len), Some(3));
}

#[test]
fn rerun_over_an_existing_sandbox_resyncs_it() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    support::execute(&doc, false).0.expect("first run");

    fs::write(f.work_dir.join("stale.o"), "junk").unwrap();
    support::execute(&doc, false).0.expect("second run");

    assert!(!f.work_dir.join("stale.o").exists());
    // the Makefile is reset from the template before the append
    let makefile = fs::read_to_string(f.mod_path().join("Makefile")).unwrap();
    assert_eq!(makefile.matches("SPRINGBOARD_ARGS").count(), 1);
}

#[test]
fn empty_extraversion_aborts_before_touching_the_work_dir() {
    let f = fixture("", NEW_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let (res, events) = support::execute(&doc, false);

    let err = res.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("EXTRAVERSION"), "unexpected err: {err}");
    assert!(err.to_string().contains("kernel.resolve"), "unexpected err: {err}");
    assert!(!f.work_dir.exists());
    assert!(!support::started(&events).contains(&"sandbox.create".to_string()));
}

#[test]
fn unmatched_major_version_is_a_no_match_failure() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    fs::write(
        f.kernel_src.join("Makefile"),
        "VERSION = 4\nPATCHLEVEL = 19\nSUBLEVEL = 91\nEXTRAVERSION = -26.an8.x86_64\n",
    )
    .unwrap();
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let err = support::execute(&doc, false).0.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoMatch);
    assert_eq!(err.kind().exit_code(), 4);
    assert!(!f.work_dir.exists());
}

#[test]
fn unbuilt_kernel_tree_is_rejected() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    fs::remove_file(f.kernel_src.join("vmlinux")).unwrap();
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let err = support::execute(&doc, false).0.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("make -j 3"), "unexpected err: {err}");
}

#[test]
fn failing_stage_stops_the_pipeline() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    support::script(
        &f.tmp.path().join("bin/make"),
        "echo \"make: *** [collect] Error 2\" >&2\nexit 2\n",
    );
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let (res, events) = support::execute(&doc, false);

    let err = res.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Process);
    assert!(err.to_string().contains("extract.run"), "unexpected err: {err}");
    assert!(
        support::log_lines(&events)
            .iter()
            .any(|l| l.contains("Error 2"))
    );
    let started = support::started(&events);
    assert_eq!(started.last().map(String::as_str), Some("extract.run"));
    assert!(!f.tmp_dir().join("schedmod-manifest.json").exists());
}

#[test]
fn dry_run_resolves_but_does_not_create_the_sandbox() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, ALL_PATCHES);
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    let (res, events) = support::execute(&doc, true);
    res.expect("dry run");

    assert!(!f.work_dir.exists());
    assert!(!f.make_log.exists());
    let lines = support::log_lines(&events);
    assert!(lines.iter().any(|l| l.starts_with("choose config dir ")));
    assert!(lines.iter().any(|l| l == "DRY-RUN: exec sandbox.create"));
    assert!(lines.iter().any(|l| l == "DRY-RUN: exec extract.finalize"));
}
