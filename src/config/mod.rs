//! Config module.
//! Provides configuration types, default paths, XML loading, and validation.
//! Re-exports give callers one flat `config::` namespace.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
pub use types::{CopySettings, ErrorStrategy, LogLevel};
pub use validate::MAX_COMPRESSION_LEVEL;
pub use xml::{create_template_config, ensure_default_config_exists, load_settings_from_xml};
