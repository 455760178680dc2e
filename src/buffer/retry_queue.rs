use super::batch::Batch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holding area for batches whose publish retries ran out.
///
/// Unbounded unless `max_batches` is set, in which case pushing onto a full
/// queue expires the oldest batch.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    batches: Mutex<VecDeque<Batch>>,
    max_batches: Option<usize>,
    expired_batches: AtomicU64,
    expired_lines: AtomicU64,
}

impl RetryQueue {
    pub fn new(max_batches: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                batches: Mutex::new(VecDeque::new()),
                max_batches: max_batches.filter(|&n| n > 0),
                expired_batches: AtomicU64::new(0),
                expired_lines: AtomicU64::new(0),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Appends to the tail. Returns the batch expired to make room, if any.
    pub fn push(&self, batch: Batch) -> Option<Batch> {
        let expired = {
            let mut batches = self.inner.batches.lock();
            let expired = match self.inner.max_batches {
                Some(limit) if batches.len() >= limit => batches.pop_front(),
                _ => None,
            };
            batches.push_back(batch);
            expired
        };

        if let Some(old) = &expired {
            self.inner.expired_batches.fetch_add(1, Ordering::Relaxed);
            self.inner
                .expired_lines
                .fetch_add(old.len() as u64, Ordering::Relaxed);
            tracing::warn!(
                batch_id = %old.id(),
                lines = old.len(),
                attempts = old.attempts(),
                "Retry queue full, expiring oldest batch"
            );
        }
        expired
    }

    pub fn pop(&self) -> Option<Batch> {
        self.inner.batches.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_lines(&self) -> usize {
        self.inner.batches.lock().iter().map(Batch::len).sum()
    }

    pub fn take_all(&self) -> Vec<Batch> {
        self.inner.batches.lock().drain(..).collect()
    }

    pub fn expired_batches(&self) -> u64 {
        self.inner.expired_batches.load(Ordering::Relaxed)
    }

    pub fn expired_lines(&self) -> u64 {
        self.inner.expired_lines.load(Ordering::Relaxed)
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
