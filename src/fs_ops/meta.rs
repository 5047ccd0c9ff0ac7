//! Metadata preservation.
//! Full-fidelity copies call `preserve_all`: permission bits, atime/mtime
//! and (with the `xattrs` feature) extended attributes. All of it is
//! best-effort: failures are logged and never abort a copy whose bytes
//! already landed.

use std::fs;
use std::path::Path;

use filetime::{FileTime, set_file_times};
use tracing::{trace, warn};

/// Mirror the source's permission bits onto `dst` (mode on Unix, the
/// readonly attribute on Windows).
fn preserve_permissions(dst: &Path, src_meta: &fs::Metadata) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = src_meta.permissions().mode() & 0o777;
        let perms = fs::Permissions::from_mode(mode);
        if let Err(e) = fs::set_permissions(dst, perms) {
            warn!(path = %dst.display(), mode = format!("{mode:o}"), error = %e, "Failed to set permissions on destination");
        } else {
            trace!(path = %dst.display(), mode = format!("{mode:o}"), "Set permissions on destination");
        }
    }
    #[cfg(windows)]
    {
        let ro = src_meta.permissions().readonly();
        match fs::metadata(dst) {
            Ok(meta) => {
                let mut perms = meta.permissions();
                perms.set_readonly(ro);
                if let Err(e) = fs::set_permissions(dst, perms) {
                    warn!(path = %dst.display(), readonly = ro, error = %e, "Failed to set readonly attribute on destination");
                }
            }
            Err(e) => {
                warn!(path = %dst.display(), error = %e, "Failed to stat destination for readonly preservation");
            }
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (dst, src_meta);
    }
}

/// Mirror permissions, atime/mtime, and extended attributes onto `dst`.
pub(crate) fn preserve_all(src: &Path, dst: &Path, src_meta: &fs::Metadata) {
    preserve_permissions(dst, src_meta);

    #[cfg(unix)]
    let times = {
        use std::os::unix::fs::MetadataExt;
        Some((
            FileTime::from_unix_time(src_meta.atime(), src_meta.atime_nsec() as u32),
            FileTime::from_unix_time(src_meta.mtime(), src_meta.mtime_nsec() as u32),
        ))
    };
    #[cfg(not(unix))]
    let times = match (
        src_meta.accessed().ok().map(FileTime::from_system_time),
        src_meta.modified().ok().map(FileTime::from_system_time),
    ) {
        (Some(at), Some(mt)) => Some((at, mt)),
        _ => None,
    };

    if let Some((at, mt)) = times {
        if let Err(e) = set_file_times(dst, at, mt) {
            warn!(path = %dst.display(), error = %e, "Failed to set atime/mtime on destination");
        } else {
            trace!(path = %dst.display(), "Set atime/mtime on destination");
        }
    }

    preserve_xattrs(src, dst);
}

/// Copy extended attributes when the `xattrs` feature is on; otherwise a
/// no-op. Per-attribute failures are logged and skipped.
fn preserve_xattrs(src: &Path, dst: &Path) {
    #[cfg(feature = "xattrs")]
    {
        let names = match xattr::list(src) {
            Ok(names) => names,
            Err(e) => {
                warn!(src = %src.display(), error = %e, "Failed to list xattrs");
                return;
            }
        };
        for name in names {
            match xattr::get(src, &name) {
                Ok(Some(value)) => {
                    if let Err(e) = xattr::set(dst, &name, &value) {
                        warn!(dst = %dst.display(), xattr = %name.to_string_lossy(), error = %e, "Failed to set xattr on destination");
                    }
                }
                Ok(None) => {
                    if let Err(e) = xattr::set(dst, &name, &[]) {
                        warn!(dst = %dst.display(), xattr = %name.to_string_lossy(), error = %e, "Failed to set empty xattr on destination");
                    }
                }
                Err(e) => {
                    warn!(src = %src.display(), xattr = %name.to_string_lossy(), error = %e, "Failed to read xattr from source");
                }
            }
        }
    }
    #[cfg(not(feature = "xattrs"))]
    {
        let _ = (src, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[cfg(unix)]
    #[test]
    fn permissions_follow_the_source() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"x").unwrap();
        fs::write(&dst, b"x").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        preserve_permissions(&dst, &fs::metadata(&src).unwrap());
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn timestamps_follow_the_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"x").unwrap();
        fs::write(&dst, b"x").unwrap();

        let old = FileTime::from_unix_time(1_000_000_000, 0);
        set_file_times(&src, old, old).unwrap();

        preserve_all(&src, &dst, &fs::metadata(&src).unwrap());
        let got = FileTime::from_last_modification_time(&fs::metadata(&dst).unwrap());
        assert_eq!(got.unix_seconds(), 1_000_000_000);
    }

    #[test]
    fn missing_destination_only_warns() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"x").unwrap();
        let meta = fs::metadata(&src).unwrap();
        // Must not panic or error out.
        preserve_all(&src, &dir.path().join("nope"), &meta);
    }
}
