//! Settings validation.
//! Rejects out-of-range values before any operation runs; errors name the field.

use tracing::debug;

use crate::errors::{CopyError, Result};

use super::types::CopySettings;

/// zlib accepts levels 0..=9.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

impl CopySettings {
    /// Validate field ranges. Every engine entry point calls this first.
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(CopyError::Configuration(
                "thread_count must be at least 1".into(),
            ));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(CopyError::Configuration(format!(
                "compression_level {} out of range 0..={MAX_COMPRESSION_LEVEL}",
                self.compression_level
            )));
        }
        if self.buffer_size != 0 && self.buffer_size < 4096 {
            return Err(CopyError::Configuration(format!(
                "buffer_size {} too small; use 0 for automatic sizing or at least 4096",
                self.buffer_size
            )));
        }
        debug!(settings = ?self, "Settings validated");
        Ok(())
    }
}
