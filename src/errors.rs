//! Typed error definitions for turbocopy.
//! Provides the well-known failure modes for better logs and tests.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, CopyError>;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Invalid path '{path}': {reason}")]
    Path { path: PathBuf, reason: String },

    #[error("Source path not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Source is a directory, expected a file: {0}")]
    SourceIsDirectory(PathBuf),

    #[error("Source is not a directory: {0}")]
    SourceNotADirectory(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Destination is not a directory: {0}")]
    DestinationNotADirectory(PathBuf),

    #[error("Permission denied on {path}: {context}")]
    PermissionDenied { path: PathBuf, context: String },

    #[error("Copy '{src}' -> '{dst}' failed: {source}")]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: Box<CopyError>,
    },

    #[error("Delta copy failed: {0}")]
    DeltaCopy(String),

    #[error("Network error contacting {addr}: {source}")]
    Network {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Unknown(String),
}

impl CopyError {
    /// Stable machine-readable code for structured logging.
    pub fn code(&self) -> &'static str {
        match self {
            CopyError::Path { .. } => "path",
            CopyError::SourceNotFound(_) => "source_not_found",
            CopyError::SourceIsDirectory(_) => "source_is_directory",
            CopyError::SourceNotADirectory(_) => "source_not_a_directory",
            CopyError::DestinationExists(_) => "destination_exists",
            CopyError::DestinationNotADirectory(_) => "destination_not_a_directory",
            CopyError::PermissionDenied { .. } => "permission_denied",
            CopyError::CopyFailed { .. } => "copy_failed",
            CopyError::DeltaCopy(_) => "delta_copy",
            CopyError::Network { .. } => "network",
            CopyError::Timeout(_) => "timeout",
            CopyError::Server(_) => "server",
            CopyError::Client(_) => "client",
            CopyError::Configuration(_) => "configuration",
            CopyError::Unsupported(_) => "unsupported",
            CopyError::Cancelled => "cancelled",
            CopyError::Io(_) => "io",
            CopyError::Unknown(_) => "unknown",
        }
    }

    /// Innermost engine error, unwrapping `CopyFailed` layers.
    pub fn root_cause(&self) -> &CopyError {
        let mut cur = self;
        while let CopyError::CopyFailed { source, .. } = cur {
            cur = source;
        }
        cur
    }

    /// Classify an io::Error against the path it occurred on, promoting the
    /// kinds that have a dedicated variant.
    pub(crate) fn from_io(err: io::Error, path: &Path) -> CopyError {
        match err.kind() {
            io::ErrorKind::NotFound => CopyError::SourceNotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => CopyError::PermissionDenied {
                path: path.to_path_buf(),
                context: err.to_string(),
            },
            _ => CopyError::Io(err),
        }
    }

    /// Wrap this error as the cause of a failed `(src, dst)` unit.
    /// Cancellation and already-wrapped failures pass through.
    pub(crate) fn wrap_pair(self, src: &Path, dst: &Path) -> CopyError {
        match self {
            e @ (CopyError::Cancelled | CopyError::CopyFailed { .. }) => e,
            other => CopyError::CopyFailed {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}
