//! Single-file copy operations through the public API.

use std::fs;
use tempfile::tempdir;

use turbocopy::{copy, copy2, copyfile, normalize, Copier, CopyError, CopySettings};

fn write_file(path: &std::path::Path, content: &[u8]) {
    fs::write(path, content).expect("write test file");
}

#[test]
fn copy_writes_the_bytes_and_returns_the_destination() {
    let td = tempdir().unwrap();
    let src = td.path().join("a.txt");
    let dst = td.path().join("b.txt");
    write_file(&src, b"the quick brown fox");

    let written = copy(&src, &dst).expect("copy");
    assert_eq!(written, normalize(&dst).unwrap());
    assert_eq!(fs::read(&dst).unwrap(), b"the quick brown fox");
}

#[test]
fn copy_into_a_directory_appends_the_basename() {
    let td = tempdir().unwrap();
    let src = td.path().join("report.csv");
    let dst_dir = td.path().join("archive");
    write_file(&src, b"h1,h2\n1,2\n");
    fs::create_dir(&dst_dir).unwrap();

    let written = copy(&src, &dst_dir).expect("copy into dir");
    assert_eq!(
        written.file_name().unwrap().to_string_lossy(),
        "report.csv"
    );
    assert!(dst_dir.join("report.csv").is_file());
}

#[test]
fn copy_overwrites_an_existing_destination() {
    let td = tempdir().unwrap();
    let src = td.path().join("src.bin");
    let dst = td.path().join("dst.bin");
    write_file(&src, b"short");
    write_file(&dst, b"much longer stale content that must vanish");

    copy(&src, &dst).expect("copy over existing file");
    assert_eq!(fs::read(&dst).unwrap(), b"short");
}

#[test]
fn copy_creates_missing_parent_directories() {
    let td = tempdir().unwrap();
    let src = td.path().join("f.dat");
    let dst = td.path().join("x/y/z/f.dat");
    write_file(&src, b"deep");

    copy(&src, &dst).expect("copy with missing parents");
    assert_eq!(fs::read(&dst).unwrap(), b"deep");
}

#[test]
fn copyfile_refuses_an_existing_directory_destination() {
    let td = tempdir().unwrap();
    let src = td.path().join("a.txt");
    let dst_dir = td.path().join("dir");
    write_file(&src, b"x");
    fs::create_dir(&dst_dir).unwrap();

    let err = copyfile(&src, &dst_dir).unwrap_err();
    assert!(
        matches!(err, CopyError::Path { .. }),
        "expected a path policy error, got: {err}"
    );
    assert!(!dst_dir.join("a.txt").exists(), "nothing must be written");
}

#[test]
fn missing_source_reports_source_not_found() {
    let td = tempdir().unwrap();
    let err = copy(td.path().join("nope.txt"), td.path().join("out.txt")).unwrap_err();
    assert!(matches!(err, CopyError::SourceNotFound(ref p) if p.ends_with("nope.txt")));
    assert_eq!(err.code(), "source_not_found");
}

#[test]
fn directory_source_reports_source_is_directory() {
    let td = tempdir().unwrap();
    let src = td.path().join("a_dir");
    fs::create_dir(&src).unwrap();

    let err = copy2(&src, td.path().join("out")).unwrap_err();
    assert!(matches!(err, CopyError::SourceIsDirectory(_)));
}

#[cfg(unix)]
#[test]
fn copy2_preserves_permissions_and_timestamps() {
    use std::os::unix::fs::PermissionsExt;

    let td = tempdir().unwrap();
    let src = td.path().join("exec.sh");
    let dst = td.path().join("copy.sh");
    write_file(&src, b"#!/bin/sh\nexit 0\n");
    fs::set_permissions(&src, fs::Permissions::from_mode(0o754)).unwrap();
    let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&src, old).unwrap();

    copy2(&src, &dst).expect("copy2");

    let meta = fs::metadata(&dst).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o754);
    assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
}

#[cfg(unix)]
#[test]
fn plain_copy_does_not_preserve_timestamps() {
    let td = tempdir().unwrap();
    let src = td.path().join("old.txt");
    let dst = td.path().join("new.txt");
    write_file(&src, b"content");
    let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&src, old).unwrap();

    copy(&src, &dst).expect("copy");

    let meta = fs::metadata(&dst).unwrap();
    assert_ne!(
        filetime::FileTime::from_last_modification_time(&meta),
        old,
        "content-only copy must leave the destination with a fresh mtime"
    );
}

#[test]
fn invalid_settings_fail_before_touching_the_filesystem() {
    let td = tempdir().unwrap();
    let src = td.path().join("a.txt");
    let dst = td.path().join("never/written.txt");
    write_file(&src, b"x");

    let copier = Copier::with_settings(CopySettings::default().with_thread_count(0));
    let err = copier.copy(&src, &dst).unwrap_err();
    assert!(matches!(err, CopyError::Configuration(_)));
    assert!(!td.path().join("never").exists());
}

#[test]
fn relative_paths_are_normalized_to_absolute_results() {
    let td = tempdir().unwrap();
    let src = td.path().join("rel.txt");
    write_file(&src, b"data");

    // Destination with ".." segments still lands in the tempdir.
    let dst = td.path().join("sub/../rel-out.txt");
    let written = copy(&src, &dst).expect("copy with dotted destination");
    assert!(written.is_absolute());
    assert_eq!(written, td.path().join("rel-out.txt"));
    assert!(!td.path().join("sub").exists(), "lexical .. must not create sub/");
}
