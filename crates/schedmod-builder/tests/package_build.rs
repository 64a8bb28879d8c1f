#![cfg(unix)]

mod support;

use std::fs;
use std::path::PathBuf;

use schedmod_builder::ErrorKind;
use schedmod_builder::app::{self, RunRequest};
use schedmod_builder::config::ConfigDoc;
use support::{Fixture, NEW_CORE, fixture};

/// A config layered over the fixture's, adding a fake `rpmbuild` that
/// records its arguments and drops one package under `RPMS/`.
fn build_doc(f: &Fixture) -> ConfigDoc {
    let rpmbuild = f.tmp.path().join("bin/rpmbuild");
    support::script(
        &rpmbuild,
        "printf '%s\\n' \"$@\" > rpmbuild-args.txt\n\
         mkdir -p RPMS/x86_64\n\
         echo payload > RPMS/x86_64/scheduler-xxx-5.10.134_13.an8.x86_64.rpm\n\
         echo \"mark=$SCHEDMOD_MARK\"\n",
    );
    let cfg = f.tmp.path().join("build.toml");
    support::write(
        &cfg,
        &format!(
            "extends = \"schedmod.toml\"\n\n[tools]\nrpmbuild = \"{}\"\n\n[package.env]\nSCHEDMOD_MARK = \"from-config\"\n",
            rpmbuild.display()
        ),
    );
    app::load_doc(
        Some(&cfg),
        app::overlay(&RunRequest::build(&f.work_dir), None).expect("overlay"),
    )
    .expect("doc")
}

fn init_sandbox(f: &Fixture) {
    let doc = f.doc(&RunRequest::dev_init(&f.kernel_src, &f.work_dir));
    support::execute(&doc, false).0.expect("dev-init");
}

#[test]
fn build_packages_an_initialised_sandbox() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, &["dynamic_springboard.patch"]);
    init_sandbox(&f);

    let (res, events) = support::execute(&build_doc(&f), false);
    res.expect("build");

    let root: PathBuf = f.tmp_dir().join("rpmbuild").canonicalize().unwrap();
    for d in ["BUILD", "RPMS", "SOURCES", "SPECS", "SRPMS"] {
        assert!(root.join(d).is_dir(), "missing {d}");
    }
    assert!(root.join("SPECS/scheduler.spec").is_file());

    let args = Fixture::read_log(&root.join("rpmbuild-args.txt"));
    assert_eq!(
        args,
        vec![
            "--define".to_string(),
            format!("%_topdir {}", root.display()),
            "--define".to_string(),
            format!("%_builddir {}", f.work_dir.display()),
            "--define".to_string(),
            "%_sdcrobjs \"kernel/sched/psi.o\"".to_string(),
            "--define".to_string(),
            "%KVER 5.10.134".to_string(),
            "--define".to_string(),
            "%KREL 13.an8".to_string(),
            "-bb".to_string(),
            "SPECS/scheduler.spec".to_string(),
        ]
    );
    assert!(
        support::log_lines(&events)
            .iter()
            .any(|l| l == "mark=from-config")
    );

    let text = fs::read_to_string(root.join("package-manifest.json")).unwrap();
    let m: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(m["kernel"], "5.10.134-13.an8.x86_64");
    let pkgs = m["packages"].as_array().unwrap();
    assert_eq!(pkgs.len(), 1);
    assert_eq!(pkgs[0]["size"], 8);
    assert!(
        pkgs[0]["path"]
            .as_str()
            .unwrap()
            .ends_with("RPMS/x86_64/scheduler-xxx-5.10.134_13.an8.x86_64.rpm")
    );
}

#[test]
fn rebuild_starts_from_a_clean_rpm_tree() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, &[]);
    init_sandbox(&f);
    let doc = build_doc(&f);
    support::execute(&doc, false).0.expect("first build");

    let leftover = f.tmp_dir().join("rpmbuild/RPMS/x86_64/old.rpm");
    fs::write(&leftover, "old").unwrap();
    support::execute(&doc, false).0.expect("second build");

    assert!(!leftover.exists());
}

#[test]
fn build_without_a_sandbox_is_rejected() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, &[]);
    let err = support::execute(&build_doc(&f), false).0.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("can't find sandbox"), "unexpected err: {err}");
    assert!(!f.work_dir.exists());
}

#[test]
fn failing_rpmbuild_is_a_process_error() {
    let f = fixture("-13.an8.x86_64", NEW_CORE, &[]);
    init_sandbox(&f);
    let doc = build_doc(&f);
    support::script(&f.tmp.path().join("bin/rpmbuild"), "exit 1\n");

    let err = support::execute(&doc, false).0.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Process);
    assert!(err.to_string().contains("package.rpm"), "unexpected err: {err}");
    assert!(!f.tmp_dir().join("rpmbuild/package-manifest.json").exists());
}
