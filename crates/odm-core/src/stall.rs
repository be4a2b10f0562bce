//! Cooperative cancellation and the no-progress watcher.
//!
//! Strategies push received-byte counts into a shared counter on every
//! buffer; the stall detector samples it once per second and raises the
//! cancel token when the configured window passes without growth. The token
//! is also how process-wide shutdown reaches a running transfer. Strategies
//! check it at every chunk/segment boundary and inside the receive callback;
//! in-flight I/O completes and is checkpointed before the strategy returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::retry::FetchError;

/// Why a transfer was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// No `bytes_written` progress within the threshold.
    Stalled,
    /// Process-wide shutdown (e.g. SIGINT).
    Interrupted,
}

/// Cancellation flag checked by strategies at suspension points.
#[derive(Default)]
pub struct CancelToken {
    flag: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock().unwrap()
    }

    /// The fetch error a strategy returns when it observes the token.
    pub fn to_error(&self) -> FetchError {
        match self.reason() {
            Some(CancelReason::Interrupted) => FetchError::Interrupted,
            _ => FetchError::Stalled,
        }
    }
}

/// Shared received-byte counter for one attempt; strategies bump it on every
/// buffer so liveness is observable at sub-second granularity.
pub type ProgressCounter = Arc<AtomicU64>;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Watches a progress counter and cancels the attempt with `Stalled` after
/// `threshold` without growth. Sampling runs on a dedicated thread; stopping
/// joins it.
pub struct StallDetector {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StallDetector {
    /// `interrupt` is the process-wide shutdown flag: the watcher translates
    /// it into an `Interrupted` cancellation so a blocked transfer notices
    /// within one sample interval.
    pub fn spawn(
        progress: ProgressCounter,
        cancel: Arc<CancelToken>,
        threshold: Duration,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_in_thread = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut last_seen = progress.load(Ordering::Relaxed);
            let mut last_change = Instant::now();
            loop {
                std::thread::sleep(SAMPLE_INTERVAL);
                if stop_in_thread.load(Ordering::Relaxed) || cancel.is_cancelled() {
                    return;
                }
                if interrupt.load(Ordering::Relaxed) {
                    cancel.cancel(CancelReason::Interrupted);
                    return;
                }
                let now_bytes = progress.load(Ordering::Relaxed);
                if now_bytes != last_seen {
                    last_seen = now_bytes;
                    last_change = Instant::now();
                } else if last_change.elapsed() >= threshold {
                    tracing::warn!(
                        threshold_s = threshold.as_secs(),
                        "no transfer progress, requesting strategy switch"
                    );
                    cancel.cancel(CancelReason::Stalled);
                    return;
                }
            }
        });
        StallDetector {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop watching and join the sampler thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for StallDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
