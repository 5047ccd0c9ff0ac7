//! Streaming byte copy.
//!
//! The single place file bytes move through. Fast kernel paths (APFS
//! clonefile, Linux copy_file_range) run when nothing needs to observe the
//! stream; a live progress reporter or a cancel token forces the chunked
//! userspace loop so both are serviced between chunks.
//!
//! Snapshot semantics: the source is read once from start to EOF; concurrent
//! growth is not included and truncation surfaces as early EOF. The policy
//! layer compares the returned byte count against the length it captured.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::cancel::{self, CancelToken};
use crate::errors::Result;
use crate::progress::Reporter;

const SMALL_FILE_BUF: usize = 64 * 1024;
const MID_FILE_BUF: usize = 1024 * 1024;
const LARGE_FILE_BUF: usize = 8 * 1024 * 1024;
const MIN_BUF: usize = 4 * 1024;
const MAX_BUF: usize = 64 * 1024 * 1024;

/// Buffer for one file: an explicit setting wins (clamped to sane bounds),
/// otherwise the size follows the file length.
pub(crate) fn pick_buffer_size(requested: usize, file_len: u64) -> usize {
    if requested != 0 {
        return requested.clamp(MIN_BUF, MAX_BUF);
    }
    if file_len < 1024 * 1024 {
        SMALL_FILE_BUF
    } else if file_len < 100 * 1024 * 1024 {
        MID_FILE_BUF
    } else {
        LARGE_FILE_BUF
    }
}

/// Copy the bytes of `src` into `dst`, truncating any existing destination.
/// Returns the number of bytes written.
pub(crate) fn copy_file_bytes(
    src: &Path,
    dst: &Path,
    buffer_size: usize,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<u64> {
    let wants_chunks = cancel.is_some() || reporter.is_some_and(|r| r.is_enabled());

    // Fast-path: APFS clonefile CoW-clones the file in O(1). clonefile
    // refuses to clobber, so the stale destination goes first; a failed
    // clone falls through to streaming, which recreates it anyway.
    #[cfg(target_os = "macos")]
    if !wants_chunks {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        if let (Ok(src_c), Ok(dst_c)) = (
            CString::new(src.as_os_str().as_bytes()),
            CString::new(dst.as_os_str().as_bytes()),
        ) {
            match std::fs::remove_file(dst) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let rc = unsafe { libc::clonefile(src_c.as_ptr(), dst_c.as_ptr(), 0) };
            if rc == 0 {
                return Ok(File::open(src)?.metadata()?.len());
            }
            // EXDEV / ENOTSUP / EPERM: not clonable on this pair.
        }
    }

    let src_f = File::open(src)?;
    let len = src_f.metadata()?.len();
    let buf = pick_buffer_size(buffer_size, len);

    let dst_f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)?;

    // Fast-path: in-kernel copy when supported for this fd pair.
    #[cfg(target_os = "linux")]
    if !wants_chunks {
        if let Some(total) = copy_file_range_loop(&src_f, &dst_f)? {
            return Ok(total);
        }
    }

    let mut reader = BufReader::with_capacity(buf, src_f);
    let mut writer = BufWriter::with_capacity(buf, dst_f);
    let mut chunk = vec![0u8; buf];
    let mut total: u64 = 0;
    loop {
        cancel::check(cancel)?;
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        writer.write_all(&chunk[..n])?;
        total += n as u64;
        if let Some(rep) = reporter {
            rep.advance(n as u64, src);
        }
    }
    writer.flush()?;
    Ok(total)
}

/// Drive copy_file_range to EOF. `Ok(None)` means the syscall is unsupported
/// for this pair and nothing was copied; stream instead.
#[cfg(target_os = "linux")]
fn copy_file_range_loop(src_f: &File, dst_f: &File) -> Result<Option<u64>> {
    use std::os::unix::io::AsRawFd;

    let mut total: u64 = 0;
    let chunk: usize = 16 * 1024 * 1024;
    loop {
        let rc = unsafe {
            libc::copy_file_range(
                src_f.as_raw_fd(),
                std::ptr::null_mut(),
                dst_f.as_raw_fd(),
                std::ptr::null_mut(),
                chunk,
                0,
            )
        };
        if rc > 0 {
            total += rc as u64;
        } else if rc == 0 {
            return Ok(Some(total));
        } else {
            let err = std::io::Error::last_os_error();
            let unsupported = matches!(
                err.raw_os_error(),
                Some(libc::EXDEV | libc::ENOSYS | libc::EINVAL | libc::EPERM)
            );
            if total == 0 && unsupported {
                return Ok(None);
            }
            return Err(err.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CopyError;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn copies_small_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"hello world").unwrap();

        let n = copy_file_bytes(&src, &dst, 0, None, None).unwrap();
        assert_eq!(n, 11);
        assert_eq!(fs::read(&dst).unwrap(), b"hello world");
    }

    #[test]
    fn overwrites_and_truncates_existing_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"something much longer than the source").unwrap();

        let n = copy_file_bytes(&src, &dst, 0, None, None).unwrap();
        assert_eq!(n, 3);
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn copies_zero_length_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("empty");
        let dst = dir.path().join("out");
        File::create(&src).unwrap();

        let n = copy_file_bytes(&src, &dst, 0, None, None).unwrap();
        assert_eq!(n, 0);
        assert_eq!(fs::metadata(&dst).unwrap().len(), 0);
    }

    #[test]
    fn small_buffer_crosses_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("big.bin");
        let dst = dir.path().join("big.out");

        let size = 3 * MIN_BUF + 123;
        let mut data = vec![0u8; size];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        fs::write(&src, &data).unwrap();

        let n = copy_file_bytes(&src, &dst, MIN_BUF, None, None).unwrap();
        assert_eq!(n as usize, size);
        assert_eq!(fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn cancelled_token_stops_before_any_read() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"data").unwrap();

        let token = CancelToken::new();
        token.cancel();
        let err = copy_file_bytes(&src, &dst, 0, None, Some(&token)).unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
        assert_eq!(fs::metadata(&dst).unwrap().len(), 0);
    }

    #[test]
    fn reporter_sees_every_byte() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        let data = vec![7u8; 5 * MIN_BUF];
        fs::write(&src, &data).unwrap();

        let reporter = Reporter::with_interval(
            Some(std::sync::Arc::new(|_, _, _| {})),
            Duration::from_secs(3600),
        );
        reporter.set_total(data.len() as u64);
        let n = copy_file_bytes(&src, &dst, MIN_BUF, Some(&reporter), None).unwrap();
        assert_eq!(n as usize, data.len());
        assert_eq!(reporter.copied(), data.len() as u64);
    }

    #[test]
    fn buffer_choice_follows_file_size() {
        assert_eq!(pick_buffer_size(0, 10), SMALL_FILE_BUF);
        assert_eq!(pick_buffer_size(0, 50 * 1024 * 1024), MID_FILE_BUF);
        assert_eq!(pick_buffer_size(0, 500 * 1024 * 1024), LARGE_FILE_BUF);
        assert_eq!(pick_buffer_size(16, 10), MIN_BUF);
        assert_eq!(pick_buffer_size(usize::MAX, 10), MAX_BUF);
        assert_eq!(pick_buffer_size(128 * 1024, 10), 128 * 1024);
    }
}
