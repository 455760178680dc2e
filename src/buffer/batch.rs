use super::queue::LogBuffer;
use std::time::Instant;
use uuid::Uuid;

/// Ordered group of formatted lines shipped as one payload.
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    lines: Vec<String>,
    created_at: Instant,
    attempts: u32,
}

impl Batch {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lines,
            created_at: Instant::now(),
            attempts: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Publish attempts made so far, across ticks.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Cuts batches of at most `batch_size` lines off the front of a [`LogBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: usize,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Takes whatever is available up to `batch_size`. An empty buffer yields
    /// no batch.
    pub fn next_batch(&self, buffer: &LogBuffer) -> Option<Batch> {
        let lines = buffer.drain(self.batch_size);
        if lines.is_empty() {
            None
        } else {
            Some(Batch::new(lines))
        }
    }

    /// Like [`Batcher::next_batch`] but only when a whole batch is waiting.
    pub fn next_full_batch(&self, buffer: &LogBuffer) -> Option<Batch> {
        if buffer.len() >= self.batch_size {
            self.next_batch(buffer)
        } else {
            None
        }
    }
}
