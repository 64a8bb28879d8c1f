//! File-tree primitives shared by the sandbox builder, the source mirror and
//! the packager.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{Error, Result};

/// Path components never mirrored, and never deleted from a destination.
pub const MIRROR_EXCLUDES: &[&str] = &[".git"];

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| Error::process(format!("failed to create {}: {e}", path.display())))
}

/// Remove whatever sits at `path` (file, symlink or directory tree).
pub fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    res.map_err(|e| Error::process(format!("failed to remove {}: {e}", path.display())))
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    if fs::symlink_metadata(dst).is_ok_and(|m| m.is_dir() || m.file_type().is_symlink()) {
        remove_path(dst)?;
    }
    fs::copy(src, dst).map_err(|e| {
        Error::process(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    use std::os::unix::fs as unix_fs;

    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    remove_path(dst)?;
    let target = fs::read_link(src)
        .map_err(|e| Error::process(format!("failed to read symlink {}: {e}", src.display())))?;
    unix_fs::symlink(&target, dst).map_err(|e| {
        Error::process(format!(
            "failed to create symlink {} -> {}: {e}",
            dst.display(),
            target.display()
        ))
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    copy_file(src, dst)
}

/// Recursive copy that dereferences symlinks, merging into an existing
/// destination and overwriting files already there.
pub fn copy_deref(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return copy_file(src, dst);
    }
    if fs::symlink_metadata(dst).is_ok_and(|m| !m.is_dir()) {
        remove_path(dst)?;
    }
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| Error::process(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&out)?;
        } else {
            copy_file(entry.path(), &out)?;
        }
    }
    Ok(())
}

pub fn write_text(p: &Path, s: &str) -> Result<()> {
    if let Some(parent) = p.parent() {
        ensure_dir(parent)?;
    }
    fs::write(p, s).map_err(|e| Error::process(format!("failed to write {}: {e}", p.display())))
}

pub fn write_json_pretty(p: &Path, v: &serde_json::Value) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
    write_text(p, &s)
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = fs::File::open(path)
        .map_err(|e| Error::process(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 256];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::process(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

fn excluded(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| MIRROR_EXCLUDES.contains(&n))
}

fn same_file_state(src: &fs::Metadata, dst: &Path) -> bool {
    let Ok(d) = fs::symlink_metadata(dst) else {
        return false;
    };
    d.is_file()
        && d.len() == src.len()
        && FileTime::from_last_modification_time(&d) == FileTime::from_last_modification_time(src)
}

fn same_symlink(src: &Path, dst: &Path) -> bool {
    let is_link = fs::symlink_metadata(dst).is_ok_and(|m| m.file_type().is_symlink());
    is_link
        && match (fs::read_link(src), fs::read_link(dst)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
}

/// Make `dst` an exact copy of `src`: files, directories and symlinks with
/// modification times preserved. Entries in `dst` with no counterpart in
/// `src` are deleted. `.git` is skipped on both sides.
pub fn mirror_tree(src: &Path, dst: &Path) -> Result<MirrorStats> {
    if !src.is_dir() {
        return Err(Error::precondition(format!(
            "source tree {} is not a directory",
            src.display()
        )));
    }
    ensure_dir(dst)?;

    let mut stats = MirrorStats::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut dir_times: Vec<(PathBuf, FileTime)> = Vec::new();

    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !excluded(e));
    for entry in walker {
        let entry = entry.map_err(|e| Error::process(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?
            .to_path_buf();
        let out = dst.join(&rel);
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| Error::process(format!("failed to stat {}: {e}", entry.path().display())))?;

        if entry.file_type().is_dir() {
            if fs::symlink_metadata(&out).is_ok_and(|m| !m.is_dir()) {
                remove_path(&out)?;
            }
            ensure_dir(&out)?;
            dir_times.push((out, FileTime::from_last_modification_time(&meta)));
        } else if entry.file_type().is_symlink() {
            if same_symlink(entry.path(), &out) {
                stats.unchanged += 1;
            } else {
                copy_symlink(entry.path(), &out)?;
                stats.copied += 1;
            }
        } else if same_file_state(&meta, &out) {
            stats.unchanged += 1;
        } else {
            if fs::symlink_metadata(&out).is_ok_and(|m| m.is_dir()) {
                remove_path(&out)?;
            }
            copy_file(entry.path(), &out)?;
            filetime::set_file_mtime(&out, FileTime::from_last_modification_time(&meta))
                .map_err(|e| {
                    Error::process(format!("failed to set mtime on {}: {e}", out.display()))
                })?;
            stats.copied += 1;
        }
        seen.insert(rel);
    }

    // Pre-order so `.git` is pruned before its contents are visited. A stale
    // directory is removed whole, so its children are not listed.
    let mut stale: Vec<PathBuf> = Vec::new();
    let mut it = walkdir::WalkDir::new(dst)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !excluded(e));
    while let Some(entry) = it.next() {
        let entry = entry.map_err(|e| Error::process(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(dst)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        if rel.as_os_str().is_empty() || seen.contains(rel) {
            continue;
        }
        if entry.file_type().is_dir() {
            it.skip_current_dir();
        }
        stale.push(entry.path().to_path_buf());
    }
    for p in &stale {
        remove_path(p)?;
    }
    stats.removed += stale.len();

    // Deepest directories first so parents keep their own times.
    for (dir, mtime) in dir_times.iter().rev() {
        filetime::set_file_mtime(dir, *mtime)
            .map_err(|e| Error::process(format!("failed to set mtime on {}: {e}", dir.display())))?;
    }

    Ok(stats)
}
