//! Logging as observed from outside the binary: JSON events on stdout,
//! optional file logging, and the symlink refusal for log paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use assert_cmd::cargo;
use serde_json::Value;
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

/// Log lines and user-facing prints share stdout; keep whatever parses.
fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[test]
fn json_mode_emits_structured_events() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("in.txt");
    fs::write(&src, b"log me").unwrap();
    let dst = base.join("out.txt");

    let out = run(
        &missing_cfg(&base),
        &[
            "cp",
            src.to_str().unwrap(),
            dst.to_str().unwrap(),
            "--json",
            "--log-level",
            "info",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let events = json_lines(&out.stdout);
    assert!(!events.is_empty(), "expected JSON events on stdout");
    for event in &events {
        assert!(event.get("timestamp").is_some());
        assert!(event.get("level").is_some());
    }
    let completed = events
        .iter()
        .find(|e| e["fields"]["message"] == "Copy completed")
        .expect("completion event");
    assert_eq!(completed["level"], "INFO");
    assert!(
        completed["fields"]["source"].as_str().unwrap().contains("in.txt"),
        "got: {completed}"
    );
    assert!(completed["fields"]["dest"].as_str().unwrap().contains("out.txt"));

    // The scriptable result line stays plain even in JSON mode.
    assert!(String::from_utf8_lossy(&out.stdout).contains("Copied"));
}

#[test]
fn json_error_events_carry_a_machine_code() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();

    let out = run(
        &missing_cfg(&base),
        &[
            "cp",
            base.join("ghost.txt").to_str().unwrap(),
            base.join("dst.txt").to_str().unwrap(),
            "--json",
        ],
    );
    assert_eq!(out.status.code(), Some(1));

    let events = json_lines(&out.stdout);
    let failed = events
        .iter()
        .find(|e| e["fields"]["message"] == "Copy failed")
        .expect("failure event");
    assert_eq!(failed["level"], "ERROR");
    assert_eq!(failed["fields"]["code"], "source_not_found");
    assert!(failed["fields"]["path"].as_str().unwrap().contains("ghost.txt"));
}

#[test]
fn log_file_captures_the_run() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("in.txt");
    fs::write(&src, b"to file").unwrap();
    let log = base.join("logs/run.log");

    let out = run(
        &missing_cfg(&base),
        &[
            "cp",
            src.to_str().unwrap(),
            base.join("out.txt").to_str().unwrap(),
            "--log-file",
            log.to_str().unwrap(),
            "--log-level",
            "info",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let contents = fs::read_to_string(&log).expect("log file should exist");
    assert!(contents.contains("Copy completed"), "log: {contents}");
}

#[cfg(unix)]
#[test]
fn symlinked_log_path_is_refused_but_the_copy_proceeds() {
    let td = tempdir().unwrap();
    let base = fs::canonicalize(td.path()).unwrap();
    let src = base.join("in.txt");
    fs::write(&src, b"still copied").unwrap();
    fs::create_dir(base.join("real")).unwrap();
    std::os::unix::fs::symlink(base.join("real"), base.join("lnk")).unwrap();
    let log = base.join("lnk/app.log");

    let out = run(
        &missing_cfg(&base),
        &[
            "cp",
            src.to_str().unwrap(),
            base.join("out.txt").to_str().unwrap(),
            "--log-file",
            log.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "the copy must not depend on file logging");
    assert!(base.join("out.txt").exists());
    assert!(!base.join("real/app.log").exists(), "refused log must not be created");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Refusing to enable file logging"), "stderr: {stderr}");
}
