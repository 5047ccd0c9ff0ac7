//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless TURBOCOPY_CONFIG is set).
//! - Exposes helpers to ensure a default config exists.
//!
//! Notes:
//! - This module only reads/writes the config file; value validation happens in validate.rs.
//! - Unknown XML fields cause a hard failure (panic) to surface misconfigurations early.

use anyhow::Result;
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::paths::{default_config_path, path_has_symlink_ancestor};
use super::types::{CopySettings, ErrorStrategy, LogLevel};
use crate::platform::{set_dir_mode_0700, set_file_mode_0600, write_config_secure_new_0600};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(rename = "thread_count", default, deserialize_with = "de_u64_trimmed_opt")]
    thread_count: Option<u64>,
    #[serde(rename = "compression_level", default, deserialize_with = "de_u64_trimmed_opt")]
    compression_level: Option<u64>,
    #[serde(rename = "buffer_size", default, deserialize_with = "de_u64_trimmed_opt")]
    buffer_size: Option<u64>,
    #[serde(rename = "preserve_metadata")]
    preserve_metadata: Option<bool>,
    #[serde(rename = "follow_symlinks")]
    follow_symlinks: Option<bool>,
    #[serde(rename = "dirs_exist_ok")]
    dirs_exist_ok: Option<bool>,
    #[serde(rename = "error_strategy")]
    error_strategy: Option<String>,
    #[serde(rename = "retry_count", default, deserialize_with = "de_u64_trimmed_opt")]
    retry_count: Option<u64>,
    #[serde(rename = "retry_delay_ms", default, deserialize_with = "de_u64_trimmed_opt")]
    retry_delay_ms: Option<u64>,
    #[serde(rename = "log_level")]
    log_level: Option<String>,
    #[serde(rename = "log_file")]
    log_file: Option<String>,
}

// Custom deserializer that trims surrounding whitespace for optional u64
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| s.trim().parse::<u64>().ok()))
}

impl XmlConfig {
    fn is_empty(&self) -> bool {
        self.thread_count.is_none()
            && self.compression_level.is_none()
            && self.buffer_size.is_none()
            && self.preserve_metadata.is_none()
            && self.follow_symlinks.is_none()
            && self.dirs_exist_ok.is_none()
            && self.error_strategy.is_none()
            && self.retry_count.is_none()
            && self.retry_delay_ms.is_none()
            && self.log_level.is_none()
            && self.log_file.is_none()
    }
}

/// Read settings from XML. TURBOCOPY_CONFIG overrides the per-platform
/// default path. Returns None if no meaningful settings are present or the
/// file doesn't exist; a template is created at the default location on the
/// first miss so users get a starting point.
pub fn load_settings_from_xml() -> Option<CopySettings> {
    let env_path = env::var_os("TURBOCOPY_CONFIG").map(PathBuf::from);
    let env_set = env_path.is_some();
    let cfg_path = match env_path {
        Some(p) => p,
        None => default_config_path().ok()?,
    };

    if !cfg_path.exists() {
        if !env_set {
            let _ = create_template_config(&cfg_path);
        }
        return None;
    }

    let content = fs::read_to_string(&cfg_path).ok()?;
    let parsed: XmlConfig = match from_xml_str(&content) {
        Ok(x) => x,
        Err(e) => {
            // Fail hard on unknown field (serde deny_unknown_fields); else, log and return None.
            let msg = e.to_string();
            if msg.contains("unknown field") {
                panic!(
                    "Unknown field in turbocopy config {}: {}. Refusing to start.",
                    cfg_path.display(),
                    msg
                );
            }
            debug!(
                "Failed to parse config.xml at {}: {}",
                cfg_path.display(),
                msg
            );
            return None;
        }
    };

    if parsed.is_empty() {
        return None;
    }

    let mut settings = CopySettings::default();
    if let Some(n) = parsed.thread_count {
        settings.thread_count = n as usize;
    }
    if let Some(level) = parsed.compression_level {
        settings.compression_level = level as u32;
    }
    if let Some(bytes) = parsed.buffer_size {
        settings.buffer_size = bytes as usize;
    }
    if let Some(b) = parsed.preserve_metadata {
        settings.preserve_metadata = b;
    }
    if let Some(b) = parsed.follow_symlinks {
        settings.follow_symlinks = b;
    }
    if let Some(b) = parsed.dirs_exist_ok {
        settings.dirs_exist_ok = b;
    }
    if let Some(s) = parsed.error_strategy.as_deref()
        && let Some(strategy) = ErrorStrategy::parse(s.trim())
    {
        settings.error_strategy = strategy;
    }
    if let Some(n) = parsed.retry_count {
        settings.retry_count = n as u32;
    }
    if let Some(ms) = parsed.retry_delay_ms {
        settings.retry_delay = Duration::from_millis(ms);
    }
    if let Some(s) = parsed.log_level.as_deref()
        && let Some(level) = LogLevel::parse(s.trim())
    {
        settings.log_level = level;
    }
    settings.log_file = parsed.log_file.as_deref().and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    });

    debug!(path = %cfg_path.display(), "Loaded settings from XML config");
    Some(settings)
}

/// Create default template config file and parent directory (best-effort permissions).
/// Uses secure creation to avoid following attacker-controlled symlinks on Unix.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        return Err(anyhow::anyhow!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = set_dir_mode_0700(parent);
    }

    let content = "<!--\n  turbocopy configuration (XML)\n\n  Numeric fields:\n    thread_count        -> worker pool size for tree copies\n    compression_level   -> 0..9 zlib level for network transfers (0 = off)\n    buffer_size         -> copy buffer in bytes (0 = pick from file size)\n    retry_count         -> attempts per unit when error_strategy=retry\n    retry_delay_ms      -> pause between retry attempts, in milliseconds\n\n  Boolean flags (true/false):\n    preserve_metadata   -> copy timestamps + permissions (+ xattrs when feature enabled)\n    follow_symlinks     -> copy link targets instead of recreating links\n    dirs_exist_ok       -> allow tree copies into existing directories\n\n  Other fields:\n    error_strategy      -> raise | retry | ignore\n    log_level           -> none | error | warning | info | debug\n    log_file            -> path to a log file (optional)\n\n  Notes:\n    - CLI flags override XML values.\n    - Set TURBOCOPY_CONFIG to load a different file.\n-->\n<config>\n  <thread_count>4</thread_count>\n  <compression_level>0</compression_level>\n  <buffer_size>0</buffer_size>\n  <preserve_metadata>true</preserve_metadata>\n  <follow_symlinks>true</follow_symlinks>\n  <dirs_exist_ok>false</dirs_exist_ok>\n  <error_strategy>raise</error_strategy>\n  <retry_count>3</retry_count>\n  <retry_delay_ms>1000</retry_delay_ms>\n  <log_level>error</log_level>\n</config>\n";

    // Atomic, secure write (O_NOFOLLOW + create_new on Unix), then tighten perms.
    write_config_secure_new_0600(path, content.as_bytes())?;
    let _ = set_file_mode_0600(path);

    info!("Created template config at {}", path.display());
    Ok(())
}

/// Create default config if TURBOCOPY_CONFIG not set; return created path so
/// the CLI can inform the user.
pub fn ensure_default_config_exists() -> Option<PathBuf> {
    if env::var_os("TURBOCOPY_CONFIG").is_some() {
        return None;
    }

    let cfg_path = default_config_path().ok()?;
    if cfg_path.exists() {
        return None;
    }

    if let Ok(true) = path_has_symlink_ancestor(&cfg_path) {
        eprintln!(
            "Refusing to create template config because an existing ancestor is a symlink: {}",
            cfg_path.display()
        );
        return None;
    }

    match create_template_config(&cfg_path) {
        Ok(()) => Some(cfg_path),
        Err(e) => {
            debug!("Could not create template config: {e}");
            None
        }
    }
}
