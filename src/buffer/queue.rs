use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Length at which the buffer-full signal fires.
    pub batch_size: usize,
    /// Oldest lines are evicted past this length. `None` keeps everything.
    pub high_water_mark: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            high_water_mark: Some(100_000),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub len: usize,
    pub peak_len: usize,
    pub submitted: u64,
    pub dropped: u64,
}

/// FIFO of formatted log lines shared between the ingestion side and the
/// delivery engine.
///
/// `enqueue` never fails and only ever holds the lock for a push (plus one
/// eviction when bounded), so producers are never held up by delivery.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    lines: Mutex<VecDeque<String>>,
    config: BufferConfig,
    full: Notify,
    submitted: AtomicU64,
    dropped: AtomicU64,
    peak_len: AtomicUsize,
}

impl LogBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                lines: Mutex::new(VecDeque::new()),
                config,
                full: Notify::new(),
                submitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                peak_len: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.inner.config
    }

    pub fn enqueue(&self, line: impl Into<String>) {
        let line = line.into();
        let (len, evicted) = {
            let mut lines = self.inner.lines.lock();
            let mut evicted = false;
            if let Some(limit) = self.inner.config.high_water_mark {
                if lines.len() >= limit {
                    lines.pop_front();
                    evicted = true;
                }
            }
            lines.push_back(line);
            (lines.len(), evicted)
        };

        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.peak_len.fetch_max(len, Ordering::Relaxed);
        if evicted {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Log on powers of two so a sustained outage doesn't flood diagnostics
            if dropped.is_power_of_two() {
                tracing::warn!(dropped, "Log buffer at high-water mark, evicting oldest lines");
            }
        }

        if len >= self.inner.config.batch_size {
            self.inner.full.notify_one();
        }
    }

    /// Removes up to `max` lines from the front, preserving order.
    pub fn drain(&self, max: usize) -> Vec<String> {
        let mut lines = self.inner.lines.lock();
        let take = max.min(lines.len());
        lines.drain(..take).collect()
    }

    /// Discards everything and returns how many lines were removed.
    pub fn clear(&self) -> usize {
        let mut lines = self.inner.lines.lock();
        let removed = lines.len();
        lines.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once the buffer has reached `batch_size` lines. A signal raised
    /// while nobody is waiting is kept for the next waiter.
    pub async fn wait_full(&self) {
        self.inner.full.notified().await;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len(),
            peak_len: self.inner.peak_len.load(Ordering::Relaxed),
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}
