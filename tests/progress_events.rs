//! Progress callbacks observed through real operations.
//! Reporter throttling and counter mechanics are unit-tested; these tests
//! check the events an API caller actually sees.

use std::fs;
use std::sync::mpsc;

use tempfile::tempdir;
use turbocopy::{
    channel_callback, copy_with_server, create_server, Copier, CopySettings, ProgressEvent,
    TreeCopyOptions,
};

fn copier_with_channel() -> (Copier, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel();
    let settings = CopySettings::default().with_progress_callback(channel_callback(tx));
    (Copier::with_settings(settings), rx)
}

#[test]
fn single_copy_reports_start_and_completion() {
    let td = tempdir().unwrap();
    let src = td.path().join("payload.bin");
    fs::write(&src, vec![3u8; 50_000]).unwrap();

    let (copier, rx) = copier_with_channel();
    copier.copy(&src, td.path().join("copy.bin")).unwrap();

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert!(events.len() >= 2, "expected start and completion at least");
    assert_eq!(events[0].bytes_copied, 0);
    assert_eq!(events[0].total_bytes, 50_000);
    let last = events.last().unwrap();
    assert_eq!(last.bytes_copied, 50_000);
    assert_eq!(last.total_bytes, 50_000);
    assert!(last.filename.contains("payload.bin"), "got {}", last.filename);
    assert!(
        events.windows(2).all(|w| w[0].bytes_copied <= w[1].bytes_copied),
        "byte counts must never go backwards"
    );
}

#[test]
fn tree_totals_cover_every_file_up_front() {
    let td = tempdir().unwrap();
    let src = td.path().join("tree");
    fs::create_dir_all(src.join("sub/empty")).unwrap();
    fs::write(src.join("a.bin"), vec![1u8; 1000]).unwrap();
    fs::write(src.join("sub/b.bin"), vec![2u8; 2000]).unwrap();
    fs::write(src.join("sub/c.bin"), vec![3u8; 3000]).unwrap();

    let (copier, rx) = copier_with_channel();
    copier
        .copytree(&src, td.path().join("out"), &TreeCopyOptions::default())
        .unwrap();

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert!(!events.is_empty());
    // The walk sizes the whole tree before the first file event.
    assert!(events.iter().all(|e| e.total_bytes == 6000));
    assert_eq!(events.last().unwrap().bytes_copied, 6000);
}

#[test]
fn batch_totals_grow_as_pairs_start() {
    let td = tempdir().unwrap();
    let a = td.path().join("a.bin");
    let b = td.path().join("b.bin");
    fs::write(&a, vec![0u8; 1000]).unwrap();
    fs::write(&b, vec![0u8; 500]).unwrap();

    let a_out = td.path().join("a.out");
    let b_out = td.path().join("b.out");
    let (copier, rx) = copier_with_channel();
    copier.batch_copy(&[(&a, &a_out), (&b, &b_out)]).unwrap();

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert_eq!(events.first().unwrap().total_bytes, 1000);
    let last = events.last().unwrap();
    assert_eq!(last.total_bytes, 1500);
    assert_eq!(last.bytes_copied, 1500);
}

#[test]
fn remote_copy_reports_progress_too() {
    let td = tempdir().unwrap();
    let src = td.path().join("remote.bin");
    fs::write(&src, vec![9u8; 30_000]).unwrap();
    let dst = td.path().join("local.bin");

    let mut server = create_server(0, 1);
    server.start().unwrap();

    let (tx, rx) = mpsc::channel();
    let settings = CopySettings::default().with_progress_callback(channel_callback(tx));
    Copier::with_settings(settings)
        .copy_with_server(&src, &dst, "127.0.0.1", server.port(), 5)
        .unwrap();
    server.stop();

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    let last = events.last().expect("remote copy should report events");
    assert_eq!(last.bytes_copied, 30_000);
    assert_eq!(last.total_bytes, 30_000);
    assert!(last.filename.contains("local.bin"), "got {}", last.filename);
}
