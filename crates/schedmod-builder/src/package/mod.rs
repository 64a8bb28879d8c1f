//! RPM packaging of an initialised sandbox.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::fsops;
use crate::kernel::KernelIdentity;
use crate::pipeline::{CommandBuilder, ToolCommand, ToolsConfig};
use crate::sandbox::SandboxLayout;

pub const RPMBUILD_DIRS: &[&str] = &["BUILD", "RPMS", "SOURCES", "SPECS", "SRPMS"];
pub const PACKAGE_MANIFEST: &str = "package-manifest.json";

fn default_spec() -> String {
    "scheduler.spec".into()
}

/// `[package]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Spec file name inside the scratch directory.
    #[serde(default = "default_spec")]
    pub spec: String,
    /// Extra environment for the packaging tool.
    pub env: BTreeMap<String, String>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            spec: default_spec(),
            env: BTreeMap::new(),
        }
    }
}

pub fn rpm_root(layout: &SandboxLayout) -> PathBuf {
    layout.tmp_dir.join("rpmbuild")
}

pub fn require_sandbox(layout: &SandboxLayout) -> Result<()> {
    if !layout.exists() {
        return Err(Error::precondition(format!(
            "can't find sandbox {}",
            layout.work_dir.display()
        )));
    }
    Ok(())
}

/// Recreate an empty rpmbuild tree and stage the spec file. Returns the
/// canonical root.
pub fn prepare_rpm_root(layout: &SandboxLayout, cfg: &PackageConfig) -> Result<PathBuf> {
    require_sandbox(layout)?;
    let spec_src = layout.tmp_dir.join(&cfg.spec);
    if !spec_src.is_file() {
        return Err(Error::precondition(format!(
            "spec file {} not found; was the sandbox initialised?",
            spec_src.display()
        )));
    }

    let root = rpm_root(layout);
    fsops::remove_path(&root)?;
    for d in RPMBUILD_DIRS {
        fsops::ensure_dir(&root.join(d))?;
    }
    let root = root
        .canonicalize()
        .map_err(|e| Error::process(format!("failed to resolve {}: {e}", root.display())))?;
    fsops::copy_file(&spec_src, &root.join("SPECS").join(&cfg.spec))?;
    Ok(root)
}

pub fn rpmbuild_command(
    tools: &ToolsConfig,
    cfg: &PackageConfig,
    layout: &SandboxLayout,
    root: &Path,
    identity: &KernelIdentity,
    sidecar_objs: &[String],
) -> ToolCommand {
    CommandBuilder::new(tools, &layout.work_dir)
        .rpmbuild(
            root,
            sidecar_objs,
            &identity.full,
            &identity.release,
            &cfg.spec,
        )
        .envs(&cfg.env)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Every `.rpm` under `RPMS/`, sorted by path.
pub fn collect_packages(root: &Path) -> Result<Vec<BuiltPackage>> {
    let mut out = Vec::new();
    let rpms = root.join("RPMS");
    if !rpms.is_dir() {
        return Ok(out);
    }
    for entry in walkdir::WalkDir::new(&rpms).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::process(format!("walkdir error: {e}")))?;
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|e| e.to_str()) != Some("rpm")
        {
            continue;
        }
        let size = fs::metadata(entry.path())
            .map_err(|e| Error::process(format!("failed to stat {}: {e}", entry.path().display())))?
            .len();
        out.push(BuiltPackage {
            path: entry.path().to_path_buf(),
            size,
            sha256: fsops::sha256_file_hex(entry.path())?,
        });
    }
    Ok(out)
}

pub fn write_package_manifest(
    root: &Path,
    identity: &KernelIdentity,
    packages: &[BuiltPackage],
) -> Result<PathBuf> {
    let manifest = json!({
        "kernel": identity.uname_r(),
        "kver": identity.full,
        "krel": identity.release,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "packages": packages.iter().map(|p| json!({
            "path": p.path.display().to_string(),
            "size": p.size,
            "sha256": p.sha256,
        })).collect::<Vec<_>>(),
    });
    let path = root.join(PACKAGE_MANIFEST);
    fsops::write_json_pretty(&path, &manifest)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn identity() -> KernelIdentity {
        KernelIdentity {
            major: "5.10".into(),
            full: "5.10.134".into(),
            release: "13.an8".into(),
            arch: Some("x86_64".into()),
            raw_release: "13.an8.x86_64".into(),
        }
    }

    #[test]
    fn missing_sandbox_is_a_precondition_failure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = SandboxLayout::new(tmp.path().join("nope"));
        let err = prepare_rpm_root(&layout, &PackageConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("can't find sandbox"), "unexpected err: {err}");
    }

    #[test]
    fn rpm_root_is_recreated_clean() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = SandboxLayout::new(tmp.path().join("work"));
        fs::create_dir_all(&layout.tmp_dir).unwrap();
        fs::write(layout.tmp_dir.join("scheduler.spec"), "Name: scheduler-xxx\n").unwrap();
        let stale = rpm_root(&layout).join("RPMS/x86_64/old.rpm");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        let root = prepare_rpm_root(&layout, &PackageConfig::default()).unwrap();
        assert!(!stale.exists());
        for d in RPMBUILD_DIRS {
            assert!(root.join(d).is_dir(), "{d} missing");
        }
        assert_eq!(
            fs::read_to_string(root.join("SPECS/scheduler.spec")).unwrap(),
            "Name: scheduler-xxx\n"
        );
    }

    #[test]
    fn command_carries_identity_and_env() {
        let layout = SandboxLayout::new("/w");
        let mut cfg = PackageConfig::default();
        cfg.env.insert("PYTHONPATH".into(), "/usr/local/lib64/python3.6".into());
        let cmd = rpmbuild_command(
            &ToolsConfig::default(),
            &cfg,
            &layout,
            Path::new("/w/working/rpmbuild"),
            &identity(),
            &[],
        );
        assert!(cmd.args.contains(&"%KREL 13.an8".to_string()));
        assert!(cmd.args.contains(&"%_sdcrobjs \"\"".to_string()));
        assert_eq!(
            cmd.env.get("PYTHONPATH").map(String::as_str),
            Some("/usr/local/lib64/python3.6")
        );
    }

    #[test]
    fn manifest_lists_built_rpms() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("RPMS/x86_64")).unwrap();
        fs::write(root.join("RPMS/x86_64/scheduler-xxx-1.rpm"), "abc").unwrap();
        fs::write(root.join("RPMS/x86_64/notes.txt"), "skip").unwrap();

        let pkgs = collect_packages(root).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].size, 3);

        let path = write_package_manifest(root, &identity(), &pkgs).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(v["krel"], "13.an8");
        assert_eq!(
            v["packages"][0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
