//! Single-file copy policy.
//!
//! One engine, two fidelity levels: content only, or content plus full
//! metadata. Destinations that are directories receive the source basename
//! (strict copies refuse instead), missing parent directories are created,
//! and an existing destination file is always replaced. Byte counts are
//! verified against the length captured at stat time; a mismatch fails the
//! pair.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, warn};

use crate::cancel::{self, CancelToken};
use crate::config::{CopySettings, ErrorStrategy};
use crate::errors::{CopyError, Result};
use crate::platform;
use crate::progress::Reporter;

use super::io_copy;
use super::meta;
use super::normalize::normalize;

/// How much of the source, beyond its bytes, the destination should mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetadataFidelity {
    /// Bytes only; destination metadata is whatever creation assigns.
    ContentOnly,
    /// Bytes plus permissions, timestamps and extended attributes.
    Full,
}

/// Copy one file according to policy. Returns the path actually written.
pub(crate) fn copy_one(
    src: &Path,
    dst: &Path,
    fidelity: MetadataFidelity,
    append_basename: bool,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    cancel::check(cancel)?;
    let src = normalize(src)?;
    let dst = normalize(dst)?;

    let link_meta = fs::symlink_metadata(&src).map_err(|e| CopyError::from_io(e, &src))?;

    if !settings.follow_symlinks && link_meta.file_type().is_symlink() {
        return recreate_symlink(&src, &dst, append_basename, reporter);
    }

    // A followed dangling link stats to NotFound, same as a missing source.
    let meta = if link_meta.file_type().is_symlink() {
        fs::metadata(&src).map_err(|e| CopyError::from_io(e, &src))?
    } else {
        link_meta
    };

    if meta.is_dir() {
        return Err(CopyError::SourceIsDirectory(src));
    }
    if !meta.is_file() {
        return Err(CopyError::Unsupported(format!(
            "{} is not a regular file",
            src.display()
        )));
    }

    let final_dst = resolve_destination(&src, &dst, append_basename)?;

    // The destination is opened with truncate; clobbering the source through
    // an aliasing path would destroy it before a byte moved.
    if final_dst.exists() && is_same_file(&src, &final_dst) {
        return Err(CopyError::Path {
            path: final_dst,
            reason: "source and destination are the same file".into(),
        });
    }

    if let Some(parent) = final_dst.parent() {
        fs::create_dir_all(parent).map_err(|e| CopyError::from_io(e, parent))?;
    }

    if let Some(rep) = reporter {
        rep.file_started(&src);
    }

    let copied = io_copy::copy_file_bytes(&src, &final_dst, settings.buffer_size, reporter, cancel)
        .map_err(|e| e.wrap_pair(&src, &final_dst))?;

    if copied != meta.len() {
        return Err(CopyError::CopyFailed {
            src: src.clone(),
            dst: final_dst.clone(),
            source: Box::new(CopyError::Unknown(format!(
                "size mismatch: wrote {copied} of {} bytes",
                meta.len()
            ))),
        });
    }

    match fidelity {
        MetadataFidelity::ContentOnly => {}
        MetadataFidelity::Full => meta::preserve_all(&src, &final_dst, &meta),
    }

    if let Some(rep) = reporter {
        rep.file_done(&src);
    }

    debug!(src = %src.display(), dst = %final_dst.display(), bytes = copied, "Copied file");
    Ok(final_dst)
}

/// With follow_symlinks off, a source symlink is reproduced as a symlink
/// carrying the same target text, dangling or not.
fn recreate_symlink(
    src: &Path,
    dst: &Path,
    append_basename: bool,
    reporter: Option<&Reporter>,
) -> Result<PathBuf> {
    let target = fs::read_link(src).map_err(|e| CopyError::from_io(e, src))?;
    let final_dst = resolve_destination(src, dst, append_basename)?;

    if let Some(parent) = final_dst.parent() {
        fs::create_dir_all(parent).map_err(|e| CopyError::from_io(e, parent))?;
    }
    match fs::symlink_metadata(&final_dst) {
        Ok(_) => fs::remove_file(&final_dst)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(rep) = reporter {
        rep.file_started(src);
    }

    // Relative targets resolve against the link's own directory.
    let target_is_dir = src
        .parent()
        .map(|p| p.join(&target))
        .is_some_and(|resolved| resolved.is_dir());
    platform::create_symlink(&target, &final_dst, target_is_dir)
        .map_err(|e| CopyError::from_io(e, &final_dst))?;

    if let Some(rep) = reporter {
        rep.file_done(src);
    }

    debug!(src = %src.display(), dst = %final_dst.display(), target = %target.display(), "Recreated symlink");
    Ok(final_dst)
}

/// Final destination path: an existing directory receives the source
/// basename when policy allows it, and refuses the copy when it does not.
fn resolve_destination(src: &Path, dst: &Path, append_basename: bool) -> Result<PathBuf> {
    if !dst.is_dir() {
        return Ok(dst.to_path_buf());
    }
    if !append_basename {
        return Err(CopyError::Path {
            path: dst.to_path_buf(),
            reason: "destination is an existing directory".into(),
        });
    }
    match src.file_name() {
        Some(name) => Ok(dst.join(name)),
        None => Err(CopyError::Path {
            path: src.to_path_buf(),
            reason: "source has no file name component".into(),
        }),
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(ma), Ok(mb)) = (fs::metadata(a), fs::metadata(b)) {
            return ma.dev() == mb.dev() && ma.ino() == mb.ino();
        }
    }
    false
}

/// Run `op`, retrying failed attempts when the strategy asks for it.
/// Cancellation is never retried.
pub(crate) fn with_retries<T>(
    settings: &CopySettings,
    what: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(CopyError::Cancelled) => return Err(CopyError::Cancelled),
            Err(e) => {
                if settings.error_strategy != ErrorStrategy::Retry
                    || attempt >= settings.retry_count
                {
                    return Err(e);
                }
                attempt += 1;
                warn!(
                    error = %e,
                    attempt,
                    max = settings.retry_count,
                    what,
                    "Operation failed; retrying"
                );
                thread::sleep(settings.retry_delay);
            }
        }
    }
}
