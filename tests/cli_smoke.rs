//! Binary-level smoke tests: exit codes and user-facing output.
//! Every spawn points TURBOCOPY_CONFIG at a missing file so runs start from
//! defaults and never write a template into the user's config directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use assert_cmd::cargo;
use tempfile::tempdir;

fn run(cfg: &Path, args: &[&str]) -> Output {
    let me = cargo::cargo_bin!("turbocopy");
    Command::new(me)
        .env("TURBOCOPY_CONFIG", cfg)
        .args(args)
        .output()
        .expect("spawn binary")
}

fn missing_cfg(base: &Path) -> PathBuf {
    base.join("no-such-config.xml")
}

#[test]
fn print_config_reports_the_override_and_succeeds() {
    let td = tempdir().unwrap();
    let cfg = missing_cfg(td.path());

    let out = run(&cfg, &["--print-config"]);
    assert!(out.status.success(), "print-config should exit 0");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("TURBOCOPY_CONFIG"), "stdout: {stdout}");
    assert!(!cfg.exists(), "print-config must not create files");
}

#[test]
fn bare_invocation_is_a_usage_error() {
    let td = tempdir().unwrap();
    let out = run(&missing_cfg(td.path()), &[]);
    assert_eq!(out.status.code(), Some(2), "usage errors exit 2");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(text.contains("Usage"), "expected usage text, got: {text}");
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let td = tempdir().unwrap();
    let out = run(&missing_cfg(td.path()), &["teleport", "a", "b"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn cp_copies_and_reports_the_destination() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("in.txt");
    let dst = base.join("out.txt");
    fs::write(&src, b"through the binary").unwrap();

    let out = run(&missing_cfg(&base), &["cp", src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(&dst).unwrap(), b"through the binary");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Copied"), "stdout: {stdout}");
}

#[test]
fn cp_missing_source_exits_one_and_names_the_path() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("ghost.txt");

    let out = run(
        &missing_cfg(&base),
        &["cp", src.to_str().unwrap(), base.join("dst.txt").to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1), "operation failures exit 1");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Source path not found"), "stderr: {stderr}");
    assert!(stderr.contains("ghost.txt"), "stderr: {stderr}");
}

#[test]
fn tree_copies_recursively_and_respects_dirs_exist_ok() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("site");
    let dst = base.join("mirror");
    fs::create_dir_all(src.join("assets")).unwrap();
    fs::write(src.join("index.html"), b"<html>").unwrap();
    fs::write(src.join("assets/app.css"), b"body{}").unwrap();
    let cfg = missing_cfg(&base);

    let out = run(&cfg, &["tree", src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(dst.join("assets/app.css")).unwrap(), b"body{}");

    // Second run hits the existing destination.
    let out = run(&cfg, &["tree", src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("Destination already exists"),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    // --dirs-exist-ok makes the rerun succeed.
    let out = run(
        &cfg,
        &["tree", src.to_str().unwrap(), dst.to_str().unwrap(), "--dirs-exist-ok"],
    );
    assert!(out.status.success());
}

#[test]
fn remote_without_a_server_still_copies_locally() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("data.bin");
    let dst = base.join("data.out");
    fs::write(&src, vec![5u8; 2048]).unwrap();

    let dead_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let out = run(
        &missing_cfg(&base),
        &[
            "remote",
            src.to_str().unwrap(),
            dst.to_str().unwrap(),
            "-s",
            "127.0.0.1",
            "--port",
            &dead_port.to_string(),
            "--retry-count",
            "0",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(&dst).unwrap(), vec![5u8; 2048]);
}

#[test]
fn delta_rebuilds_the_destination() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let reference = base.join("v1.bin");
    let mut body: Vec<u8> = (0..60_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&reference, &body).unwrap();
    body[30_000] = b'!';
    let src = base.join("v2.bin");
    fs::write(&src, &body).unwrap();
    let dst = base.join("rebuilt.bin");

    let out = run(
        &missing_cfg(&base),
        &[
            "delta",
            src.to_str().unwrap(),
            dst.to_str().unwrap(),
            reference.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(&dst).unwrap(), body);
}

#[test]
fn rejected_option_value_is_a_usage_error() {
    let td = tempdir().unwrap();
    let out = run(
        &missing_cfg(td.path()),
        &["cp", "a", "b", "--threads", "many"],
    );
    assert_eq!(out.status.code(), Some(2));
}
