//! Filesystem operations: modularized.

pub(crate) mod copy_file;
pub(crate) mod io_copy;
pub(crate) mod meta;
pub(crate) mod normalize;
pub(crate) mod tree;

pub use normalize::normalize;
pub use tree::TreeCopyOptions;
