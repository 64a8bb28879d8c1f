//! Profile catalog lookup: one directory per supported kernel release under
//! `<tool_root>/configs/`.

pub mod boundary;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::kernel::KernelIdentity;

pub use boundary::BoundaryConfig;

pub const BOUNDARY_FILE: &str = "boundary.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigProfile {
    pub name: String,
    pub dir: PathBuf,
}

impl ConfigProfile {
    pub fn boundary_path(&self) -> PathBuf {
        self.dir.join(BOUNDARY_FILE)
    }

    pub fn load_boundary(&self) -> Result<BoundaryConfig> {
        BoundaryConfig::load(&self.boundary_path())
    }
}

/// Number of leading characters `a` and `b` share.
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Pick the profile whose name shares the longest prefix with the kernel's
/// match key. Candidates are walked in reverse lexical order and the first
/// maximal score wins.
pub fn choose<'a>(candidates: &'a [String], key: &str) -> Option<&'a str> {
    let mut sorted: Vec<&String> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.cmp(a));

    let mut best: Option<(&str, usize)> = None;
    for name in sorted {
        let score = common_prefix_len(name, key);
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((name.as_str(), score)),
        }
    }
    best.map(|(name, _)| name)
}

fn list_candidates(catalog: &Path, major: &str) -> Result<Vec<String>> {
    let rd = fs::read_dir(catalog).map_err(|e| {
        Error::precondition(format!(
            "failed to read profile catalog {}: {e}",
            catalog.display()
        ))
    })?;
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with(major) {
            out.push(name);
        }
    }
    Ok(out)
}

/// Select the catalog profile for `identity`. No candidate for the major
/// version is fatal; there is no fallback profile.
pub fn select_profile(catalog: &Path, identity: &KernelIdentity) -> Result<ConfigProfile> {
    let candidates = list_candidates(catalog, &identity.major)?;
    let key = identity.match_key();
    let Some(name) = choose(&candidates, &key) else {
        return Err(Error::no_match(format!(
            "no configuration profile in {} matches kernel {} (major {})",
            catalog.display(),
            key,
            identity.major
        )));
    };
    let profile = ConfigProfile {
        name: name.to_string(),
        dir: catalog.join(name),
    };
    tracing::info!(
        profile = %profile.name,
        dir = %profile.dir.display(),
        kernel = %key,
        "selected configuration profile"
    );
    Ok(profile)
}
