//! Path normalization.
//! Turns user-supplied paths into absolute, lexically resolved forms usable
//! by every other component. Resolution is purely lexical (destinations may
//! not exist yet) and never rewrites the drive/root a path started from.
//! Windows results switch to extended-length form once they cross the
//! classic MAX_PATH ceiling; wire helpers convert path text between UTF-8
//! and the platform representation, primary encoding first.

use std::env;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
#[cfg(not(unix))]
use tracing::warn;

use crate::errors::{CopyError, Result};

/// Normalize `path`: absolute, `.`/`..` resolved, platform-safe length form.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(CopyError::Path {
            path: path.to_path_buf(),
            reason: "empty path".into(),
        });
    }

    #[cfg(windows)]
    validate_drive_designator(path)?;

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map_err(|e| CopyError::Path {
                path: path.to_path_buf(),
                reason: format!("cannot resolve against working directory: {e}"),
            })?
            .join(path)
    };

    let cleaned = resolve_dots(&absolute);

    #[cfg(windows)]
    let cleaned = apply_length_policy(cleaned);

    debug!(input = %path.display(), normalized = %cleaned.display(), "Normalized path");
    Ok(cleaned)
}

/// Lexical `.`/`..` resolution. `..` at the root stays at the root; symlinks
/// are left alone (following them is copy policy, not path syntax).
fn resolve_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // pop() refuses to drop the root/prefix, which is what we want.
                let _ = out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}

/// Reject malformed or drive-relative designators ("1:\x", "C:file").
#[cfg(windows)]
fn validate_drive_designator(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' {
        if !bytes[0].is_ascii_alphabetic() {
            return Err(CopyError::Path {
                path: path.to_path_buf(),
                reason: format!("malformed drive specification '{}'", &text[..2]),
            });
        }
        if bytes.len() > 2 && bytes[2] != b'\\' && bytes[2] != b'/' {
            return Err(CopyError::Path {
                path: path.to_path_buf(),
                reason: "drive-relative paths are not supported".into(),
            });
        }
    }
    Ok(())
}

/// Beyond the classic 260-char ceiling, emit \\?\ (or \\?\UNC\) form so the
/// Win32 layer accepts the path; below it, keep the simplified spelling.
#[cfg(windows)]
fn apply_length_policy(path: PathBuf) -> PathBuf {
    use std::ffi::OsString;
    use std::path::Prefix;

    const CLASSIC_CEILING: usize = 260;

    let prefix = path.components().next();
    let already_verbatim = matches!(
        prefix,
        Some(Component::Prefix(p))
            if matches!(p.kind(), Prefix::Verbatim(_) | Prefix::VerbatimDisk(_) | Prefix::VerbatimUNC(..))
    );

    if path.as_os_str().len() < CLASSIC_CEILING {
        if already_verbatim {
            return dunce::simplified(&path).to_path_buf();
        }
        return path;
    }
    if already_verbatim {
        return path;
    }

    match prefix {
        Some(Component::Prefix(p)) if matches!(p.kind(), Prefix::UNC(..)) => {
            // \\server\share\... -> \\?\UNC\server\share\...
            let text = path.as_os_str().to_os_string();
            let text = text.to_string_lossy();
            let mut fixed = OsString::from(r"\\?\UNC\");
            fixed.push(text.trim_start_matches('\\'));
            PathBuf::from(fixed)
        }
        _ => {
            let mut out = OsString::from(r"\\?\");
            out.push(path.as_os_str());
            PathBuf::from(out)
        }
    }
}

/// Encode path text for the wire: UTF-8 primary, raw platform bytes as the
/// Unix fallback, lossy text as the Windows fallback.
pub(crate) fn path_to_wire(path: &Path) -> Vec<u8> {
    match path.to_str() {
        Some(s) => s.as_bytes().to_vec(),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::ffi::OsStrExt;
                path.as_os_str().as_bytes().to_vec()
            }
            #[cfg(not(unix))]
            {
                warn!(path = %path.display(), "Path is not valid UTF-8; sending lossy form");
                path.to_string_lossy().into_owned().into_bytes()
            }
        }
    }
}

/// Decode wire path text: UTF-8 primary, platform fallback otherwise.
pub(crate) fn wire_to_path(bytes: &[u8]) -> PathBuf {
    match std::str::from_utf8(bytes) {
        Ok(s) => PathBuf::from(s),
        Err(_) => {
            #[cfg(unix)]
            {
                use std::os::unix::ffi::OsStrExt;
                PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
            }
            #[cfg(not(unix))]
            {
                let lossy = String::from_utf8_lossy(bytes).into_owned();
                warn!(path = %lossy, "Wire path is not valid UTF-8; using lossy form");
                PathBuf::from(lossy)
            }
        }
    }
}
