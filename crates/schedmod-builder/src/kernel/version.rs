use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

/// Architecture tags that may trail EXTRAVERSION, checked in this order.
pub const ARCH_TAGS: &[&str] = &[".x86_64", ".aarch64"];

/// Version identity of the target kernel build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelIdentity {
    /// `VERSION.PATCHLEVEL`, e.g. `5.10`.
    pub major: String,
    /// `VERSION.PATCHLEVEL.SUBLEVEL`, e.g. `5.10.0`.
    pub full: String,
    /// EXTRAVERSION without leading/trailing dashes and without the arch tag.
    pub release: String,
    /// `x86_64` / `aarch64` when EXTRAVERSION carried one.
    pub arch: Option<String>,
    /// EXTRAVERSION as written (dash-trimmed), arch tag included.
    pub raw_release: String,
}

impl KernelIdentity {
    /// String used to pick a configuration profile. Never contains the arch.
    pub fn match_key(&self) -> String {
        format!("{}-{}", self.full, self.release)
    }

    /// What `uname -r` reports on the target.
    pub fn uname_r(&self) -> String {
        format!("{}-{}", self.full, self.raw_release)
    }
}

/// Value of the first line starting with `key`, split on `=`, field 2.
fn makefile_field<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content
        .lines()
        .find(|line| line.starts_with(key))
        .map(|line| line.split('=').nth(1).unwrap_or("").trim())
}

/// Cut the release at the first known arch tag.
pub fn strip_arch(release: &str) -> (&str, Option<&'static str>) {
    for tag in ARCH_TAGS {
        if let Some(idx) = release.find(tag) {
            return (&release[..idx], Some(tag.trim_start_matches('.')));
        }
    }
    (release, None)
}

pub fn parse_identity(content: &str, origin: &Path) -> Result<KernelIdentity> {
    let field = |key: &str| -> Result<String> {
        match makefile_field(content, key) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(Error::precondition(format!(
                "{key} is not set in {}; is this a kernel Makefile?",
                origin.display()
            ))),
        }
    };
    let version = field("VERSION")?;
    let patchlevel = field("PATCHLEVEL")?;
    let sublevel = field("SUBLEVEL")?;

    let raw_release = makefile_field(content, "EXTRAVERSION")
        .unwrap_or("")
        .trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string();
    let (release, arch) = strip_arch(&raw_release);
    if release.is_empty() {
        return Err(Error::precondition(format!(
            "EXTRAVERSION is empty in {}: this looks like a non-released kernel; \
             set EXTRAVERSION in the Makefile before building the kernel",
            origin.display()
        )));
    }

    Ok(KernelIdentity {
        major: format!("{version}.{patchlevel}"),
        full: format!("{version}.{patchlevel}.{sublevel}"),
        release: release.to_string(),
        arch: arch.map(str::to_string),
        raw_release: raw_release.clone(),
    })
}

/// Read the kernel's top-level Makefile and derive its identity.
pub fn resolve_identity(makefile: &Path) -> Result<KernelIdentity> {
    let content = fs::read_to_string(makefile).map_err(|e| {
        Error::precondition(format!(
            "failed to read kernel Makefile {}: {e}",
            makefile.display()
        ))
    })?;
    parse_identity(&content, makefile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn makefile(extra: &str) -> String {
        format!(
            "# SPDX-License-Identifier: GPL-2.0\nVERSION = 5\nPATCHLEVEL = 10\nSUBLEVEL = 134\nEXTRAVERSION = {extra}\nNAME = Dare mighty things\n"
        )
    }

    #[test]
    fn parses_release_and_strips_arch() {
        let id = parse_identity(&makefile("-13.an8.x86_64"), Path::new("Makefile")).unwrap();
        assert_eq!(id.major, "5.10");
        assert_eq!(id.full, "5.10.134");
        assert_eq!(id.release, "13.an8");
        assert_eq!(id.arch.as_deref(), Some("x86_64"));
        assert_eq!(id.match_key(), "5.10.134-13.an8");
        assert_eq!(id.uname_r(), "5.10.134-13.an8.x86_64");
    }

    #[test]
    fn release_without_arch_is_kept_whole() {
        let id = parse_identity(&makefile("-123"), Path::new("Makefile")).unwrap();
        assert_eq!(id.release, "123");
        assert_eq!(id.arch, None);
    }

    #[test]
    fn aarch64_tag_is_recognised() {
        let id = parse_identity(&makefile("-2.el8.aarch64"), Path::new("Makefile")).unwrap();
        assert_eq!(id.release, "2.el8");
        assert_eq!(id.arch.as_deref(), Some("aarch64"));
    }

    #[test]
    fn empty_release_is_a_precondition_failure() {
        let err = parse_identity(&makefile(""), Path::new("/k/Makefile")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("EXTRAVERSION"), "unexpected err: {err}");
        assert!(err.to_string().contains("/k/Makefile"), "unexpected err: {err}");
    }

    #[test]
    fn release_that_is_only_an_arch_tag_is_empty() {
        let err = parse_identity(&makefile("-.x86_64"), Path::new("Makefile")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn missing_version_field_is_reported() {
        let err = parse_identity("PATCHLEVEL = 10\n", Path::new("Makefile")).unwrap_err();
        assert!(err.to_string().contains("VERSION"), "unexpected err: {err}");
    }
}
