//! Recursive directory copy.
//!
//! One logical walk per tree: each level validates, creates its destination
//! directory, then iterates entries in name-sorted order. Regular files at a
//! level run as parallel units on a worker pool; subdirectories recurse on
//! the walking thread. Entry types are read without following links, so a
//! symlinked directory is never recursed into and traversal cycles cannot
//! form. The walk is fail-fast: the first entry failure surfaces as
//! `CopyFailed` naming the entry, and nothing already copied is rolled back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::{self, CancelToken};
use crate::config::{CopySettings, ErrorStrategy};
use crate::errors::{CopyError, Result};
use crate::output::format_bytes;
use crate::platform;
use crate::progress::Reporter;

use super::copy_file::{self, MetadataFidelity};
use super::normalize::normalize;

/// Per-walk policy flags, applied at every recursion level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeCopyOptions {
    /// Recreate symlink entries at the destination. When false, symlink
    /// entries are skipped entirely.
    pub symlinks: bool,
    /// With `symlinks`, skip links whose target is missing instead of
    /// failing the walk.
    pub ignore_dangling_symlinks: bool,
    /// Allow existing destination directories instead of failing with
    /// `DestinationExists`.
    pub dirs_exist_ok: bool,
}

impl TreeCopyOptions {
    /// Options derived from engine settings; link handling stays off.
    pub fn from_settings(settings: &CopySettings) -> Self {
        Self {
            dirs_exist_ok: settings.dirs_exist_ok,
            ..Self::default()
        }
    }
}

/// Copy the directory tree rooted at `src` to `dst`.
pub(crate) fn copy_tree(
    src: &Path,
    dst: &Path,
    opts: &TreeCopyOptions,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    cancel::check(cancel)?;
    let src = normalize(src)?;
    let dst = normalize(dst)?;

    let expected = estimate_tree_size(&src);
    if let Some(rep) = reporter {
        rep.add_total(expected);
    }
    preflight_free_space(&dst, expected);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.thread_count)
        .build()
        .map_err(|e| CopyError::Configuration(format!("worker pool: {e}")))?;

    copy_level(&src, &dst, opts, settings, reporter, cancel, &pool)?;
    info!(src = %src.display(), dst = %dst.display(), bytes = expected, "Tree copy complete");
    Ok(())
}

fn copy_level(
    src: &Path,
    dst: &Path,
    opts: &TreeCopyOptions,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
    pool: &rayon::ThreadPool,
) -> Result<()> {
    cancel::check(cancel)?;

    // Validate: applies independently at every level, before any copy here.
    let src_meta = fs::metadata(src).map_err(|e| CopyError::from_io(e, src))?;
    if !src_meta.is_dir() {
        return Err(CopyError::SourceNotADirectory(src.to_path_buf()));
    }
    match fs::metadata(dst) {
        Ok(m) if !m.is_dir() => {
            return Err(CopyError::DestinationNotADirectory(dst.to_path_buf()));
        }
        Ok(_) if !opts.dirs_exist_ok => {
            return Err(CopyError::DestinationExists(dst.to_path_buf()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dst).map_err(|e| CopyError::from_io(e, dst))?;
        }
        Err(e) => return Err(CopyError::from_io(e, dst)),
    }

    let mut entries = fs::read_dir(src)
        .map_err(|e| CopyError::from_io(e, src))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| CopyError::from_io(e, src))?;
    entries.sort_by_key(|e| e.file_name());

    let ignore_failures = settings.error_strategy == ErrorStrategy::Ignore;
    let mut files: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut dirs: Vec<(PathBuf, PathBuf)> = Vec::new();

    for entry in entries {
        cancel::check(cancel)?;
        let src_child = entry.path();
        let dst_child = dst.join(entry.file_name());
        let ft = entry
            .file_type()
            .map_err(|e| CopyError::from_io(e, &src_child))?;

        if ft.is_symlink() {
            if !opts.symlinks {
                debug!(path = %src_child.display(), "Skipping symlink entry");
                continue;
            }
            if let Err(e) = recreate_symlink_entry(&src_child, &dst_child, opts) {
                let e = e.wrap_pair(&src_child, &dst_child);
                if ignore_failures && !matches!(e, CopyError::Cancelled) {
                    warn!(error = %e, path = %src_child.display(), "Skipping failed symlink entry");
                    continue;
                }
                return Err(e);
            }
        } else if ft.is_dir() {
            dirs.push((src_child, dst_child));
        } else if ft.is_file() {
            files.push((src_child, dst_child));
        } else {
            let e = CopyError::Unsupported(format!("{} is not a regular file", src_child.display()))
                .wrap_pair(&src_child, &dst_child);
            if ignore_failures {
                warn!(error = %e, path = %src_child.display(), "Skipping special file entry");
                continue;
            }
            return Err(e);
        }
    }

    // CopyFile: regular files of this level run as parallel units. Tree
    // copies preserve metadata unless the settings opt out.
    let fidelity = if settings.preserve_metadata {
        MetadataFidelity::Full
    } else {
        MetadataFidelity::ContentOnly
    };
    let unit = |s: &Path, d: &Path| -> Result<()> {
        copy_file::with_retries(settings, "tree file copy", || {
            copy_file::copy_one(s, d, fidelity, false, settings, reporter, cancel).map(|_| ())
        })
        .map_err(|e| e.wrap_pair(s, d))
    };

    if !files.is_empty() {
        if ignore_failures {
            pool.install(|| {
                files.par_iter().for_each(|(s, d)| {
                    if let Err(e) = unit(s, d) {
                        warn!(error = %e, path = %s.display(), "Skipping failed file entry");
                    }
                });
            });
        } else {
            pool.install(|| files.par_iter().try_for_each(|(s, d)| unit(s, d)))?;
        }
        cancel::check(cancel)?;
    }

    // Recurse after this level's files so the walk stays depth-ordered.
    for (s, d) in dirs {
        match copy_level(&s, &d, opts, settings, reporter, cancel, pool) {
            Ok(()) => {}
            Err(CopyError::Cancelled) => return Err(CopyError::Cancelled),
            Err(e) if ignore_failures => {
                warn!(error = %e, path = %s.display(), "Skipping failed subtree");
            }
            Err(e) => return Err(e.wrap_pair(&s, &d)),
        }
    }

    Ok(())
}

/// Recreate a symlink entry at the destination, checking the target first.
fn recreate_symlink_entry(
    src_child: &Path,
    dst_child: &Path,
    opts: &TreeCopyOptions,
) -> Result<()> {
    match fs::metadata(src_child) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if opts.ignore_dangling_symlinks {
                warn!(path = %src_child.display(), "Skipping dangling symlink");
                return Ok(());
            }
            return Err(CopyError::SourceNotFound(src_child.to_path_buf()));
        }
        Err(e) => return Err(CopyError::from_io(e, src_child)),
    }

    let target = fs::read_link(src_child).map_err(|e| CopyError::from_io(e, src_child))?;
    match fs::symlink_metadata(dst_child) {
        Ok(_) => fs::remove_file(dst_child).map_err(|e| CopyError::from_io(e, dst_child))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CopyError::from_io(e, dst_child)),
    }

    // Relative targets resolve against the link's own directory.
    let target_is_dir = src_child
        .parent()
        .map(|p| p.join(&target))
        .is_some_and(|resolved| resolved.is_dir());
    platform::create_symlink(&target, dst_child, target_is_dir)
        .map_err(|e| CopyError::from_io(e, dst_child))?;
    debug!(src = %src_child.display(), dst = %dst_child.display(), "Recreated symlink");
    Ok(())
}

/// Regular-file bytes under `root`, best-effort. Links are not followed, so
/// the sum matches what the walk will actually stream.
fn estimate_tree_size(root: &Path) -> u64 {
    walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Warn when the destination volume reports less free space than the tree
/// needs. Advisory only; the copy proceeds either way.
fn preflight_free_space(dst: &Path, needed: u64) {
    if needed == 0 {
        return;
    }
    let probe = existing_ancestor(dst);
    match platform::free_space_bytes(probe) {
        Ok(free) if free < needed => {
            warn!(
                needed = %format_bytes(needed),
                free = %format_bytes(free),
                dst = %dst.display(),
                "Destination volume may not have enough free space"
            );
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, path = %probe.display(), "Free-space preflight unavailable"),
    }
}

/// Nearest existing ancestor of `p` (the path itself when it exists).
fn existing_ancestor(p: &Path) -> &Path {
    let mut cur = p;
    while !cur.exists() {
        match cur.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => cur = parent,
            _ => break,
        }
    }
    cur
}
