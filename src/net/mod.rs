//! Accelerated transfer: wire protocol, delta encoding, server and client.

pub(crate) mod client;
pub(crate) mod delta;
pub(crate) mod protocol;
pub(crate) mod server;

pub use protocol::{DEFAULT_PORT, DEFAULT_THREAD_COUNT};
pub use server::{Server, ServerStats};
