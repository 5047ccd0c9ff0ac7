//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - Global flags override config values (which are loaded from XML if present).
//! - --debug is a shorthand for --log-level debug.

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::time::Duration;

use turbocopy::{CopySettings, ErrorStrategy, LogLevel, DEFAULT_PORT, DEFAULT_THREAD_COUNT};

/// CLI wrapper for the turbocopy library.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Copy files and trees locally or through a transfer server",
    arg_required_else_help = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        global = true,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: none, error, warning, info, debug.
    #[arg(
        long,
        global = true,
        help = "Set log level: none, error, warning, info, debug"
    )]
    pub log_level: Option<String>,

    /// Also write logs to this file (non-blocking appender).
    #[arg(long, global = true, value_hint = ValueHint::FilePath, help = "Write logs to a file as well as stdout")]
    pub log_file: Option<PathBuf>,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, global = true, help = "Emit logs in structured JSON")]
    pub json: bool,

    /// Worker pool size for tree copies.
    #[arg(long, global = true, value_name = "N", help = "Worker pool size for tree copies")]
    pub threads: Option<usize>,

    /// Copy buffer size in bytes (0 = pick from file size).
    #[arg(
        long,
        global = true,
        value_name = "BYTES",
        help = "Copy buffer size in bytes (0 = pick from file size)"
    )]
    pub buffer_size: Option<usize>,

    /// How per-unit failures propagate. One of: raise, retry, ignore.
    #[arg(
        long,
        global = true,
        value_name = "STRATEGY",
        help = "Failure handling: raise, retry, ignore"
    )]
    pub error_strategy: Option<String>,

    /// Attempts per unit when the strategy is retry.
    #[arg(
        long,
        global = true,
        value_name = "N",
        help = "Attempts per unit when --error-strategy retry"
    )]
    pub retry_count: Option<u32>,

    /// Pause between retry attempts, in milliseconds.
    #[arg(
        long,
        global = true,
        value_name = "MS",
        help = "Pause between retry attempts, in milliseconds"
    )]
    pub retry_delay_ms: Option<u64>,

    /// Render a live progress line on stderr.
    #[arg(long, global = true, help = "Render a live progress line on stderr")]
    pub progress: bool,

    /// Print where turbocopy will look for the config file (or TURBOCOPY_CONFIG if set), then exit.
    #[arg(
        long,
        global = true,
        help = "Print the config file location used by turbocopy and exit"
    )]
    pub print_config: bool,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Copy one file, preserving metadata (like `cp -p`).
    Cp(CpArgs),

    /// Copy a directory tree recursively.
    Tree(TreeArgs),

    /// Copy through a transfer server, falling back to a local copy.
    Remote(RemoteArgs),

    /// Rebuild a file from a local reference plus the changed blocks.
    Delta(DeltaArgs),

    /// Run a transfer server until interrupted.
    Serve(ServeArgs),
}

/// Arguments for the `cp` command.
#[derive(Parser, Debug, Clone)]
pub struct CpArgs {
    /// Source file.
    #[arg(value_name = "SRC", value_hint = ValueHint::FilePath)]
    pub src: PathBuf,

    /// Destination file or directory (a directory receives SRC's basename).
    #[arg(value_name = "DST", value_hint = ValueHint::AnyPath)]
    pub dst: PathBuf,

    /// Copy content only; skip timestamps, permissions and xattrs.
    #[arg(long, help = "Copy content only; skip timestamps and permissions")]
    pub no_preserve: bool,
}

/// Arguments for the `tree` command.
#[derive(Parser, Debug, Clone)]
pub struct TreeArgs {
    /// Source directory.
    #[arg(value_name = "SRC", value_hint = ValueHint::DirPath)]
    pub src: PathBuf,

    /// Destination directory (created, parents included).
    #[arg(value_name = "DST", value_hint = ValueHint::DirPath)]
    pub dst: PathBuf,

    /// Recreate symlinks at the destination instead of skipping them.
    #[arg(long, help = "Recreate symlinks instead of skipping them")]
    pub symlinks: bool,

    /// With --symlinks, skip links whose target is missing instead of failing.
    #[arg(
        long,
        help = "With --symlinks, skip links whose target is missing instead of failing"
    )]
    pub ignore_dangling_symlinks: bool,

    /// Allow copying into a destination directory that already exists.
    #[arg(long, help = "Allow an existing destination directory")]
    pub dirs_exist_ok: bool,
}

/// Arguments for the `remote` command.
#[derive(Parser, Debug, Clone)]
pub struct RemoteArgs {
    /// Source file or directory on the server.
    #[arg(value_name = "SRC", value_hint = ValueHint::AnyPath)]
    pub src: PathBuf,

    /// Local destination.
    #[arg(value_name = "DST", value_hint = ValueHint::AnyPath)]
    pub dst: PathBuf,

    /// Transfer server host name or address.
    #[arg(long, short = 's', value_name = "ADDR", help = "Transfer server host")]
    pub server: String,

    /// Transfer server port.
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// zlib compression level for the transfer (0 = off, 9 = max).
    #[arg(
        long,
        short = 'c',
        value_name = "LEVEL",
        help = "Compression level 0-9 (0 = off)"
    )]
    pub compression: Option<u32>,
}

/// Arguments for the `delta` command.
#[derive(Parser, Debug, Clone)]
pub struct DeltaArgs {
    /// Source file.
    #[arg(value_name = "SRC", value_hint = ValueHint::FilePath)]
    pub src: PathBuf,

    /// Destination file or directory.
    #[arg(value_name = "DST", value_hint = ValueHint::AnyPath)]
    pub dst: PathBuf,

    /// Older copy of the source used to skip unchanged blocks.
    #[arg(value_name = "REFERENCE", value_hint = ValueHint::FilePath)]
    pub reference: PathBuf,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on (0 = let the OS pick).
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum concurrent transfer sessions.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_THREAD_COUNT)]
    pub threads: usize,
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to loaded settings (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, settings: &mut CopySettings) {
        if let Some(n) = self.threads {
            settings.thread_count = n;
        }
        if let Some(bytes) = self.buffer_size {
            settings.buffer_size = bytes;
        }
        if let Some(s) = self.error_strategy.as_deref()
            && let Some(strategy) = ErrorStrategy::parse(s)
        {
            settings.error_strategy = strategy;
        }
        if let Some(n) = self.retry_count {
            settings.retry_count = n;
        }
        if let Some(ms) = self.retry_delay_ms {
            settings.retry_delay = Duration::from_millis(ms);
        }
        if let Some(level) = self.effective_log_level() {
            settings.log_level = level;
        }
        if let Some(path) = &self.log_file {
            settings.log_file = Some(path.clone());
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
