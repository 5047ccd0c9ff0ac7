//! Core configuration types.
//! - CopySettings holds per-engine runtime settings with library defaults.
//! - ErrorStrategy selects how per-unit failures propagate.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::progress::ProgressCallback;

/// Verbosity levels exposed to users/config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No diagnostics at all
    None,
    /// Only errors (default)
    #[default]
    Error,
    /// Errors and warnings
    Warning,
    /// Informational output
    Info,
    /// Debug/trace detail (normalized paths, negotiation steps)
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" | "quiet" => Some(LogLevel::None),
            "error" => Some(LogLevel::Error),
            "warning" | "warn" => Some(LogLevel::Warning),
            "info" | "normal" => Some(LogLevel::Info),
            "debug" | "verbose" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// How a failing unit of work (file copy, tree entry, batch pair) propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// Abort the enclosing operation on the first failure (default)
    #[default]
    Raise,
    /// Retry the failing unit up to `retry_count` times, then surface
    Retry,
    /// Log per-item failures and keep going
    Ignore,
}

impl ErrorStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raise" | "fail" => Some(ErrorStrategy::Raise),
            "retry" => Some(ErrorStrategy::Retry),
            "ignore" | "skip" => Some(ErrorStrategy::Ignore),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStrategy::Raise => "raise",
            ErrorStrategy::Retry => "retry",
            ErrorStrategy::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid error strategy: '{s}'"))
    }
}

/// Per-engine settings. Exactly one instance lives on each `Copier` handle;
/// mutating it affects operations started afterwards on that handle only.
#[derive(Clone)]
pub struct CopySettings {
    /// Worker pool size for tree file units; also the server worker cap.
    pub thread_count: usize,
    /// zlib level used on the network path (0 = stored, 9 = max).
    pub compression_level: u32,
    /// Copy buffer in bytes; 0 picks a size from the source length.
    pub buffer_size: usize,
    /// Preserve timestamps/permissions on copy2-style operations.
    pub preserve_metadata: bool,
    /// Follow a symlinked source instead of recreating the link.
    pub follow_symlinks: bool,
    /// Allow tree copies into pre-existing destination directories.
    pub dirs_exist_ok: bool,
    pub error_strategy: ErrorStrategy,
    /// Attempts per unit under `ErrorStrategy::Retry`.
    pub retry_count: u32,
    /// Pause between retry attempts.
    pub retry_delay: Duration,
    /// Engine verbosity (the binary maps this onto the subscriber filter).
    pub log_level: LogLevel,
    /// Optional progress sink, shared with every worker of an operation.
    pub progress_callback: Option<ProgressCallback>,
    /// Optional path to a log file.
    pub log_file: Option<PathBuf>,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            thread_count: 4,
            compression_level: 0,
            buffer_size: 0,
            preserve_metadata: true,
            follow_symlinks: true,
            dirs_exist_ok: false,
            error_strategy: ErrorStrategy::Raise,
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            log_level: LogLevel::Error,
            progress_callback: None,
            log_file: None,
        }
    }
}

impl fmt::Debug for CopySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopySettings")
            .field("thread_count", &self.thread_count)
            .field("compression_level", &self.compression_level)
            .field("buffer_size", &self.buffer_size)
            .field("preserve_metadata", &self.preserve_metadata)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("dirs_exist_ok", &self.dirs_exist_ok)
            .field("error_strategy", &self.error_strategy)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("log_level", &self.log_level)
            .field("progress_callback", &self.progress_callback.is_some())
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl CopySettings {
    pub fn with_thread_count(mut self, n: usize) -> Self {
        self.thread_count = n;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_preserve_metadata(mut self, preserve: bool) -> Self {
        self.preserve_metadata = preserve;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_dirs_exist_ok(mut self, ok: bool) -> Self {
        self.dirs_exist_ok = ok;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }
}
