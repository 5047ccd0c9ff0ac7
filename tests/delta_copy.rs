//! Delta copy through the public API: destination handling and metadata.
//! The reconstruction algorithm itself is exercised by the library's own
//! unit tests.

use std::fs;

use filetime::FileTime;
use tempfile::tempdir;
use turbocopy::{delta_copy, normalize, Copier, CopySettings};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 233) as u8).collect()
}

/// A source and a reference that differ in one small region, so the delta
/// path (not the full-copy fallback) is the one under test.
fn close_pair(td: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf, Vec<u8>) {
    let reference = td.path().join("v1.bin");
    let mut body = patterned(80_000);
    fs::write(&reference, &body).unwrap();
    body[40_000..40_008].copy_from_slice(b"patched!");
    let src = td.path().join("v2.bin");
    fs::write(&src, &body).unwrap();
    (src, reference, body)
}

#[test]
fn delta_into_a_directory_appends_the_basename() {
    let td = tempdir().unwrap();
    let (src, reference, body) = close_pair(&td);
    let dst_dir = td.path().join("releases");
    fs::create_dir(&dst_dir).unwrap();

    let written = delta_copy(&src, &dst_dir, &reference).unwrap();
    assert_eq!(written, normalize(&dst_dir.join("v2.bin")).unwrap());
    assert_eq!(fs::read(&written).unwrap(), body);
}

#[test]
fn existing_destination_is_overwritten() {
    let td = tempdir().unwrap();
    let (src, reference, body) = close_pair(&td);
    let dst = td.path().join("out.bin");
    fs::write(&dst, b"stale content that is about to go away").unwrap();

    delta_copy(&src, &dst, &reference).unwrap();
    assert_eq!(fs::read(&dst).unwrap(), body);
}

#[test]
fn identical_reference_rebuilds_byte_for_byte() {
    let td = tempdir().unwrap();
    let body = patterned(30_000);
    let src = td.path().join("same.bin");
    let reference = td.path().join("twin.bin");
    fs::write(&src, &body).unwrap();
    fs::write(&reference, &body).unwrap();

    let written = delta_copy(&src, td.path().join("out.bin"), &reference).unwrap();
    assert_eq!(fs::read(written).unwrap(), body);
}

#[test]
fn preserved_mtime_matches_the_source() {
    let td = tempdir().unwrap();
    let (src, reference, _) = close_pair(&td);
    let old = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&src, old).unwrap();

    // preserve_metadata defaults to on.
    let written = delta_copy(&src, td.path().join("out.bin"), &reference).unwrap();
    let meta = fs::metadata(written).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 1_000_000_000);
}

#[test]
fn content_only_settings_leave_fresh_timestamps() {
    let td = tempdir().unwrap();
    let (src, reference, _) = close_pair(&td);
    filetime::set_file_mtime(&src, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

    let copier = Copier::with_settings(CopySettings::default().with_preserve_metadata(false));
    let written = copier
        .delta_copy(&src, td.path().join("out.bin"), &reference)
        .unwrap();
    let meta = fs::metadata(written).unwrap();
    assert!(FileTime::from_last_modification_time(&meta).unix_seconds() > 1_500_000_000);
}
