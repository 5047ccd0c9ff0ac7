//! Core library for `turbocopy`.
//!
//! A copy engine with shutil-shaped semantics (`copy`, `copy2`, `copyfile`,
//! `copytree`), batch and spawned async variants, and an accelerated network
//! path: a block-protocol transfer server plus a client that falls back to a
//! plain local copy when no server answers. Everything is driven by one
//! `CopySettings` value; the `Copier` handle binds settings to operations,
//! and free functions cover the one-shot cases.

pub mod batch;
pub mod cancel;
pub mod config;
mod copier;
pub mod errors;
pub mod fs_ops;
pub mod net;
pub mod output;
pub mod platform;
pub mod progress;

pub use batch::CopyTask;
pub use cancel::CancelToken;
pub use config::{CopySettings, ErrorStrategy, LogLevel, MAX_COMPRESSION_LEVEL};
pub use copier::{
    batch_copy, batch_copy2, batch_copytree, copy, copy2, copy_with_server, copyfile, copytree,
    create_server, delta_copy, Copier,
};
pub use errors::{CopyError, Result};
pub use fs_ops::{normalize, TreeCopyOptions};
pub use net::{Server, ServerStats, DEFAULT_PORT, DEFAULT_THREAD_COUNT};
pub use progress::{channel_callback, ProgressCallback, ProgressEvent};
