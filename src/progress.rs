//! Progress reporting.
//! Operations drive a `Reporter`, which throttles mid-file events to a
//! bounded cadence but always emits a start and a completion event per file.
//! Emission happens under one lock, so a callback never runs concurrently
//! with itself even when file units execute on a worker pool.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Callback invoked with (bytes copied so far, total bytes expected,
/// current file name). Must be callable from worker threads.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

/// One progress observation, passed by value and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub filename: String,
}

/// Adapt an mpsc sender into a callback, for callers that prefer a stream
/// of events over a closure. Send failures are ignored (receiver gone).
pub fn channel_callback(tx: Sender<ProgressEvent>) -> ProgressCallback {
    Arc::new(move |bytes_copied, total_bytes, filename| {
        let _ = tx.send(ProgressEvent {
            bytes_copied,
            total_bytes,
            filename: filename.to_string(),
        });
    })
}

const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Per-operation progress state: cumulative byte counters plus the throttle
/// gate. Cheap to construct; one per engine operation.
pub struct Reporter {
    callback: Option<ProgressCallback>,
    total: AtomicU64,
    copied: AtomicU64,
    last_emit: Mutex<Instant>,
    min_interval: Duration,
}

impl Reporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self::with_interval(callback, DEFAULT_EMIT_INTERVAL)
    }

    pub fn with_interval(callback: Option<ProgressCallback>, min_interval: Duration) -> Self {
        Self {
            callback,
            total: AtomicU64::new(0),
            copied: AtomicU64::new(0),
            last_emit: Mutex::new(Instant::now()),
            min_interval,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Total bytes this operation expects to move. Set before the first
    /// file event; tree walks accumulate via `add_total`.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add_total(&self, more: u64) {
        self.total.fetch_add(more, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn copied(&self) -> u64 {
        self.copied.load(Ordering::Relaxed)
    }

    /// Forced emit marking a file about to be copied.
    pub(crate) fn file_started(&self, name: &Path) {
        self.emit(name, true);
    }

    /// Record copied bytes; emits at most once per `min_interval`.
    pub(crate) fn advance(&self, bytes: u64, name: &Path) {
        self.copied.fetch_add(bytes, Ordering::Relaxed);
        self.emit(name, false);
    }

    /// Forced emit marking a file fully copied.
    pub(crate) fn file_done(&self, name: &Path) {
        self.emit(name, true);
    }

    fn emit(&self, name: &Path, force: bool) {
        let Some(cb) = &self.callback else { return };
        let mut last = match self.last_emit.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if !force && last.elapsed() < self.min_interval {
            return;
        }
        *last = Instant::now();
        let copied = self.copied.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        cb(copied, total, &name.to_string_lossy());
    }
}
