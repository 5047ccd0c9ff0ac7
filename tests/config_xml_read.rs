//! XML config loading through TURBOCOPY_CONFIG.
//! The variable is process-global, so every test here is serialized.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;
use tempfile::tempdir;
use turbocopy::config::{ensure_default_config_exists, load_settings_from_xml};
use turbocopy::{CopySettings, ErrorStrategy, LogLevel};

fn write_cfg(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.xml");
    fs::write(&path, body).unwrap();
    path
}

fn with_config_at(path: &Path, f: impl FnOnce()) {
    unsafe {
        env::set_var("TURBOCOPY_CONFIG", path);
    }
    f();
    unsafe {
        env::remove_var("TURBOCOPY_CONFIG");
    }
}

#[test]
#[serial]
fn full_config_maps_every_field() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        r#"<config>
  <thread_count>8</thread_count>
  <compression_level>6</compression_level>
  <buffer_size>1048576</buffer_size>
  <preserve_metadata>false</preserve_metadata>
  <follow_symlinks>false</follow_symlinks>
  <dirs_exist_ok>true</dirs_exist_ok>
  <error_strategy>retry</error_strategy>
  <retry_count>5</retry_count>
  <retry_delay_ms>250</retry_delay_ms>
  <log_level>debug</log_level>
  <log_file>/tmp/turbocopy-test.log</log_file>
</config>"#,
    );

    with_config_at(&cfg, || {
        let settings = load_settings_from_xml().expect("config should load");
        assert_eq!(settings.thread_count, 8);
        assert_eq!(settings.compression_level, 6);
        assert_eq!(settings.buffer_size, 1_048_576);
        assert!(!settings.preserve_metadata);
        assert!(!settings.follow_symlinks);
        assert!(settings.dirs_exist_ok);
        assert_eq!(settings.error_strategy, ErrorStrategy::Retry);
        assert_eq!(settings.retry_count, 5);
        assert_eq!(settings.retry_delay, Duration::from_millis(250));
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(
            settings.log_file.as_deref(),
            Some(Path::new("/tmp/turbocopy-test.log"))
        );
    });
}

#[test]
#[serial]
fn partial_config_keeps_defaults_elsewhere() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        "<config><thread_count>2</thread_count><dirs_exist_ok>true</dirs_exist_ok></config>",
    );

    with_config_at(&cfg, || {
        let settings = load_settings_from_xml().expect("config should load");
        let defaults = CopySettings::default();
        assert_eq!(settings.thread_count, 2);
        assert!(settings.dirs_exist_ok);
        assert_eq!(settings.compression_level, defaults.compression_level);
        assert_eq!(settings.retry_count, defaults.retry_count);
        assert_eq!(settings.error_strategy, defaults.error_strategy);
        assert_eq!(settings.log_level, defaults.log_level);
        assert_eq!(settings.log_file, None);
    });
}

#[test]
#[serial]
fn numeric_fields_are_trimmed_and_bad_values_ignored() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        "<config>
  <thread_count>  6  </thread_count>
  <retry_count>plenty</retry_count>
</config>",
    );

    with_config_at(&cfg, || {
        let settings = load_settings_from_xml().expect("config should load");
        assert_eq!(settings.thread_count, 6);
        assert_eq!(settings.retry_count, CopySettings::default().retry_count);
    });
}

#[test]
#[serial]
fn empty_config_yields_none() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(dir.path(), "<config></config>");

    with_config_at(&cfg, || {
        assert!(load_settings_from_xml().is_none());
    });
}

#[test]
#[serial]
fn unparseable_file_yields_none() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(dir.path(), "this is not xml at all <<<");

    with_config_at(&cfg, || {
        assert!(load_settings_from_xml().is_none());
    });
}

#[test]
#[serial]
fn unknown_strategy_and_level_fall_back_to_defaults() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        "<config>
  <error_strategy>explode</error_strategy>
  <log_level>shouting</log_level>
</config>",
    );

    with_config_at(&cfg, || {
        let settings = load_settings_from_xml().expect("config should load");
        assert_eq!(settings.error_strategy, ErrorStrategy::Raise);
        assert_eq!(settings.log_level, LogLevel::Error);
    });
}

#[test]
#[serial]
fn blank_log_file_means_unset() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        "<config><log_file>   </log_file><thread_count>3</thread_count></config>",
    );

    with_config_at(&cfg, || {
        let settings = load_settings_from_xml().expect("config should load");
        assert_eq!(settings.log_file, None);
    });
}

#[test]
#[serial]
#[should_panic(expected = "Unknown field")]
fn unknown_field_refuses_to_start() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(
        dir.path(),
        "<config><thread_cuont>4</thread_cuont></config>",
    );

    unsafe {
        env::set_var("TURBOCOPY_CONFIG", &cfg);
    }
    // remove_var cleanup is unreachable past the panic; the serial guard and
    // per-test set_var keep later tests correct anyway.
    let _ = load_settings_from_xml();
}

#[test]
#[serial]
fn missing_override_file_loads_nothing_and_writes_no_template() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("never-created.xml");

    with_config_at(&cfg, || {
        assert!(load_settings_from_xml().is_none());
        assert!(!cfg.exists(), "override path must not be auto-created");
    });
}

#[test]
#[serial]
fn ensure_default_is_a_no_op_while_the_override_is_set() {
    let dir = tempdir().unwrap();
    let cfg = write_cfg(dir.path(), "<config></config>");

    with_config_at(&cfg, || {
        assert_eq!(ensure_default_config_exists(), None);
    });
}
