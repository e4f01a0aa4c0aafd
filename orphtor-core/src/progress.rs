//! Progress reporting and cooperative cancellation for hashing runs.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Emitted after every chunk the hasher consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent<'a> {
    /// File the chunk came from, as `a/b/c`.
    pub file: &'a str,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receives progress events. Returning [`Flow::Stop`] cancels the run.
pub trait ProgressSink {
    fn progress(&mut self, event: &ProgressEvent<'_>) -> Flow;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressEvent<'_>) -> Flow,
{
    fn progress(&mut self, event: &ProgressEvent<'_>) -> Flow {
        self(event)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _event: &ProgressEvent<'_>) -> Flow {
        Flow::Continue
    }
}

/// Shared stop flag, checked at chunk and piece boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Periodic stderr reporter. Records the latest event and prints a status
/// line from a background thread every `interval` while started.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    pub current_file: Arc<Mutex<String>>,
    pub bytes_done: Arc<AtomicU64>,
    pub bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(2),
            current_file: Arc::new(Mutex::new(String::new())),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
        }
    }

    /// Events received after `token` is cancelled answer [`Flow::Stop`].
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn percent(&self) -> f64 {
        let done = self.bytes_done.load(Ordering::Relaxed);
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total > 0 {
            (done as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let me = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while me.running.load(Ordering::Relaxed) {
                thread::sleep(me.interval);
                if !me.running.load(Ordering::Relaxed) {
                    break;
                }
                let file = me.current_file.lock().map(|f| f.clone()).unwrap_or_default();
                eprintln!(
                    "[{:>4}s] hashing {} | {:.0}%",
                    t0.elapsed().as_secs(),
                    file,
                    me.percent()
                );
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl ProgressSink for Progress {
    fn progress(&mut self, event: &ProgressEvent<'_>) -> Flow {
        self.bytes_total.store(event.bytes_total, Ordering::Relaxed);
        self.bytes_done.store(event.bytes_done, Ordering::Relaxed);
        if let Ok(mut f) = self.current_file.lock() {
            if f.as_str() != event.file {
                f.clear();
                f.push_str(event.file);
            }
        }
        if self.cancel.is_cancelled() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
