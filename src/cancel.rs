//! Cooperative cancellation.
//! A process-wide shutdown flag (set by the signal handler) plus cloneable
//! per-task tokens. Workers poll at chunk and entry boundaries; partially
//! written destinations are left as-is on cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{CopyError, Result};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a process-wide shutdown (typically from a signal handler).
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// True once a process-wide shutdown has been requested.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) fn reset_shutdown() {
    SHUTDOWN.store(false, Ordering::SeqCst);
}

/// Cancellation handle for one unit of work. Cheap to clone. A token also
/// observes the process-wide shutdown flag, so Ctrl-C stops every unit.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the unit owning this token. Idempotent; never affects units
    /// holding other tokens.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || shutdown_requested()
    }
}

/// Fail with `Cancelled` when the token (or the global flag) is set.
pub(crate) fn check(token: Option<&CancelToken>) -> Result<()> {
    let cancelled = match token {
        Some(t) => t.is_cancelled(),
        None => shutdown_requested(),
    };
    if cancelled {
        Err(CopyError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Serialized: these tests read or write the process-wide flag.
    #[test]
    #[serial(shutdown)]
    fn tokens_are_independent() {
        reset_shutdown();
        let a = CancelToken::new();
        let b = CancelToken::new();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(check(Some(&a)).is_err());
        assert!(check(Some(&b)).is_ok());
    }

    #[test]
    #[serial(shutdown)]
    fn clones_share_the_flag() {
        reset_shutdown();
        let a = CancelToken::new();
        let a2 = a.clone();
        a2.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    #[serial(shutdown)]
    fn global_shutdown_reaches_every_token() {
        reset_shutdown();
        let t = CancelToken::new();
        assert!(check(None).is_ok());
        request_shutdown();
        assert!(t.is_cancelled());
        assert!(check(None).is_err());
        reset_shutdown();
    }
}
