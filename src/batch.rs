//! Batch orchestration.
//!
//! `run_batch` drives (src, dst) pairs in list order, fail-fast: the first
//! failing pair surfaces wrapped as `CopyFailed` naming the pair. Under the
//! `ignore` strategy the failure is logged and the batch continues.
//! `CopyTask` is the handle for spawned units: one worker thread plus the
//! cancel token that stops it at the next chunk or entry boundary.

use std::path::Path;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::cancel::{self, CancelToken};
use crate::config::{CopySettings, ErrorStrategy};
use crate::errors::{CopyError, Result};

/// Process pairs in order, applying `op` to each.
pub(crate) fn run_batch<P, Q>(
    pairs: &[(P, Q)],
    settings: &CopySettings,
    cancel: Option<&CancelToken>,
    mut op: impl FnMut(&Path, &Path) -> Result<()>,
) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let ignore = settings.error_strategy == ErrorStrategy::Ignore;
    for (src, dst) in pairs {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        cancel::check(cancel)?;
        match op(src, dst) {
            Ok(()) => debug!(src = %src.display(), dst = %dst.display(), "Batch pair done"),
            Err(CopyError::Cancelled) => return Err(CopyError::Cancelled),
            Err(e) if ignore => {
                warn!(error = %e, src = %src.display(), dst = %dst.display(), "Skipping failed batch pair");
            }
            Err(e) => return Err(e.wrap_pair(src, dst)),
        }
    }
    Ok(())
}

/// Handle for a spawned copy unit: its worker thread and cancel token.
/// Cancelling one task never affects sibling tasks.
pub struct CopyTask<T = std::path::PathBuf> {
    handle: JoinHandle<Result<T>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> CopyTask<T> {
    /// Spawn `f` on its own thread with a fresh token.
    pub(crate) fn spawn(f: impl FnOnce(CancelToken) -> Result<T> + Send + 'static) -> Self {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || f(token));
        Self { handle, cancel }
    }
}

impl<T> CopyTask<T> {
    /// Ask the unit to stop at its next chunk or entry boundary. The unit
    /// finishes with `Cancelled`; partial destinations are left as-is.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Clone of the unit's token, e.g. to tie it to external signals.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the unit and return its outcome.
    pub fn join(self) -> Result<T> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(CopyError::Unknown("copy task panicked".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pairs_run_in_list_order() {
        let mut seen: Vec<PathBuf> = Vec::new();
        let pairs = [("a", "x"), ("b", "y"), ("c", "z")];
        run_batch(&pairs, &CopySettings::default(), None, |src, _| {
            seen.push(src.to_path_buf());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![PathBuf::from("a"), "b".into(), "c".into()]);
    }

    #[test]
    fn first_failure_stops_the_batch_and_names_the_pair() {
        let mut seen = 0;
        let pairs = [("a", "x"), ("missing.txt", "y"), ("c", "z")];
        let err = run_batch(&pairs, &CopySettings::default(), None, |src, _| {
            seen += 1;
            if src == Path::new("missing.txt") {
                Err(CopyError::SourceNotFound(src.to_path_buf()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert_eq!(seen, 2, "pair after the failure must not run");
        assert!(err.to_string().contains("missing.txt"));
        assert!(matches!(err.root_cause(), CopyError::SourceNotFound(_)));
    }

    #[test]
    fn ignore_strategy_runs_every_pair() {
        let settings = CopySettings::default().with_error_strategy(ErrorStrategy::Ignore);
        let mut seen = 0;
        let pairs = [("a", "x"), ("bad", "y"), ("c", "z")];
        run_batch(&pairs, &settings, None, |src, _| {
            seen += 1;
            if src == Path::new("bad") {
                Err(CopyError::Unknown("boom".into()))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn cancelled_token_stops_between_pairs() {
        let token = CancelToken::new();
        token.cancel();
        let pairs = [("a", "x")];
        let err = run_batch(&pairs, &CopySettings::default(), Some(&token), |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
    }

    #[test]
    fn task_runs_to_completion() {
        let task = CopyTask::spawn(|_| Ok(PathBuf::from("done")));
        assert_eq!(task.join().unwrap(), PathBuf::from("done"));
    }

    #[test]
    fn cancelling_one_task_leaves_siblings_alone() {
        let a = CopyTask::spawn(|token: CancelToken| {
            while !token.is_cancelled() {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            Err::<(), _>(CopyError::Cancelled)
        });
        let b = CopyTask::spawn(|_| Ok(()));
        a.cancel();
        assert!(matches!(a.join().unwrap_err(), CopyError::Cancelled));
        assert!(b.join().is_ok());
    }
}
