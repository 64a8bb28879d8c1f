use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsops;

use super::SandboxLayout;

/// Which tree a mapping pattern is globbed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRoot {
    Tool,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDest {
    Tmp,
    Module,
    Work,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMapping {
    pub root: MapRoot,
    pub pattern: &'static str,
    pub dest: MapDest,
}

const fn map(root: MapRoot, pattern: &'static str, dest: MapDest) -> FileMapping {
    FileMapping {
        root,
        pattern,
        dest,
    }
}

/// Assets overlaid on a fresh sandbox. Applied top to bottom; a later entry
/// overwrites what an earlier one placed at the same path.
pub const DEFAULT_MAPPINGS: &[FileMapping] = &[
    map(MapRoot::Profile, "*", MapDest::Tmp),
    map(MapRoot::Tool, "boundary/*.py", MapDest::Tmp),
    map(MapRoot::Tool, "tools/symbol_resolve", MapDest::Tmp),
    map(MapRoot::Tool, "tools/springboard_search.sh", MapDest::Tmp),
    map(MapRoot::Tool, "src/Makefile.plugsched", MapDest::Tmp),
    map(MapRoot::Tool, "module-contrib/*", MapDest::Tmp),
    map(MapRoot::Tool, "src/*.[ch]", MapDest::Module),
    map(MapRoot::Tool, "src/Makefile", MapDest::Module),
    map(MapRoot::Tool, "src/scheduler.lds", MapDest::Module),
    map(MapRoot::Tool, "src/.gitignore", MapDest::Work),
];

/// Roots the mapping patterns are resolved against.
#[derive(Debug, Clone)]
pub struct MapRoots<'a> {
    pub tool_root: &'a Path,
    pub profile_dir: &'a Path,
}

impl FileMapping {
    fn root_dir<'a>(&self, roots: &MapRoots<'a>) -> &'a Path {
        match self.root {
            MapRoot::Tool => roots.tool_root,
            MapRoot::Profile => roots.profile_dir,
        }
    }

    fn dest_dir<'a>(&self, layout: &'a SandboxLayout) -> &'a Path {
        match self.dest {
            MapDest::Tmp => &layout.tmp_dir,
            MapDest::Module => &layout.mod_path,
            MapDest::Work => &layout.work_dir,
        }
    }

    /// Paths the pattern matches, in glob order. Wildcards never match a
    /// leading dot, as in the shell.
    pub fn matches(&self, roots: &MapRoots<'_>) -> Result<Vec<PathBuf>> {
        let root = self.root_dir(roots);
        let escaped = glob::Pattern::escape(&root.to_string_lossy());
        let full = format!("{}/{}", escaped.trim_end_matches('/'), self.pattern);
        let opts = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let paths = glob::glob_with(&full, opts)
            .map_err(|e| Error::config(format!("invalid mapping pattern '{}': {e}", self.pattern)))?;
        let mut out = Vec::new();
        for p in paths {
            out.push(p.map_err(|e| Error::process(format!("glob error: {e}")))?);
        }
        Ok(out)
    }

    /// Copy every match into the destination directory under its base
    /// name. A pattern matching nothing means the install is incomplete.
    pub fn apply(&self, roots: &MapRoots<'_>, layout: &SandboxLayout) -> Result<Vec<PathBuf>> {
        let found = self.matches(roots)?;
        if found.is_empty() {
            return Err(Error::precondition(format!(
                "missing asset: nothing matches '{}' under {}",
                self.pattern,
                self.root_dir(roots).display()
            )));
        }
        let dest = self.dest_dir(layout);
        fsops::ensure_dir(dest)?;
        let mut placed = Vec::with_capacity(found.len());
        for src in found {
            let Some(name) = src.file_name() else {
                continue;
            };
            let out = dest.join(name);
            fsops::copy_deref(&src, &out)?;
            placed.push(out);
        }
        Ok(placed)
    }
}

/// Apply `mappings` in declared order.
pub fn apply_mappings(
    mappings: &[FileMapping],
    roots: &MapRoots<'_>,
    layout: &SandboxLayout,
) -> Result<usize> {
    let mut total = 0;
    for m in mappings {
        let placed = m.apply(roots, layout)?;
        tracing::debug!(pattern = m.pattern, count = placed.len(), "mapped assets");
        total += placed.len();
    }
    Ok(total)
}
