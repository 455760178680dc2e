use crate::buffer::{Batch, Batcher, LogBuffer, RetryQueue};
use crate::domain::RoutingKey;
use crate::network::ReachabilitySignal;
use crate::reliability::{RetryBudget, RetryPolicy};
use crate::sender::{
    CompressionError, Compressor, ConnectionError, ConnectionManager, DeliveryMetrics,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("Batch {batch_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        batch_id: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Batch {batch_id} set aside after {attempts} attempts: retry budget exhausted")]
    BudgetExhausted { batch_id: String, attempts: u32 },
}

/// `Idle → Publishing → {Success | Failed}`; the last outcome is kept until
/// the next publish starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Publishing,
    Success,
    Failed,
}

/// What one pass of the engine did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Nothing was attempted because the network was unreachable.
    pub skipped: bool,
    pub batches_published: usize,
    pub lines_published: usize,
    pub batches_failed: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.skipped |= other.skipped;
        self.batches_published += other.batches_published;
        self.lines_published += other.lines_published;
        self.batches_failed += other.batches_failed;
    }
}

pub struct DeliveryEngine {
    connection: Arc<ConnectionManager>,
    buffer: LogBuffer,
    batcher: Batcher,
    retry_queue: RetryQueue,
    compressor: Compressor,
    signal: ReachabilitySignal,
    routing_key: RoutingKey,
    publish_retry: RetryPolicy,
    metrics: DeliveryMetrics,
    state: RwLock<EngineState>,
    // Serializes passes so the loop and a shutdown drain never interleave
    pass_lock: Mutex<()>,
}

pub struct DeliveryEngineParts {
    pub connection: Arc<ConnectionManager>,
    pub buffer: LogBuffer,
    pub retry_queue: RetryQueue,
    pub signal: ReachabilitySignal,
    pub routing_key: RoutingKey,
    pub publish_retry: RetryPolicy,
    pub metrics: DeliveryMetrics,
}

impl DeliveryEngine {
    pub fn new(parts: DeliveryEngineParts) -> Self {
        let batch_size = parts.buffer.config().batch_size;
        Self {
            connection: parts.connection,
            buffer: parts.buffer,
            batcher: Batcher::new(batch_size),
            retry_queue: parts.retry_queue,
            compressor: Compressor::new(),
            signal: parts.signal,
            routing_key: parts.routing_key,
            publish_retry: parts.publish_retry,
            metrics: parts.metrics,
            state: RwLock::new(EngineState::Idle),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry_queue
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    /// One scheduled pass: retry queue first, then at most one new batch.
    pub async fn tick(&self) -> TickReport {
        self.tick_within(&RetryBudget::unlimited()).await
    }

    /// [`DeliveryEngine::tick`] that starts no attempt or delay once `budget`
    /// is exhausted. Batches cut short go to the retry queue.
    pub async fn tick_within(&self, budget: &RetryBudget) -> TickReport {
        let _pass = self.pass_lock.lock().await;
        if !self.signal.is_reachable() {
            debug!(
                buffered = self.buffer.len(),
                retry_queue = self.retry_queue.len(),
                "Network unreachable, skipping tick"
            );
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }

        let mut report = self.drain_retry_queue_locked(budget).await;
        if budget.is_exhausted() {
            return report;
        }
        if let Some(batch) = self.batcher.next_batch(&self.buffer) {
            report.merge(self.deliver(batch, false, budget).await);
        }
        report
    }

    /// Out-of-band retry-queue drain, triggered when the network comes back.
    pub async fn drain_retry_queue(&self) -> TickReport {
        self.drain_retry_queue_within(&RetryBudget::unlimited()).await
    }

    pub async fn drain_retry_queue_within(&self, budget: &RetryBudget) -> TickReport {
        let _pass = self.pass_lock.lock().await;
        if !self.signal.is_reachable() {
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        self.drain_retry_queue_locked(budget).await
    }

    /// Publishes every complete batch waiting in the buffer, stopping at the
    /// first failure. Queued retries go first; while any remain, new batches
    /// wait for the next pass.
    pub async fn flush_full_batches(&self) -> TickReport {
        self.flush_full_batches_within(&RetryBudget::unlimited()).await
    }

    pub async fn flush_full_batches_within(&self, budget: &RetryBudget) -> TickReport {
        let _pass = self.pass_lock.lock().await;
        let mut report = self.drain_retry_queue_locked(budget).await;
        if !self.retry_queue.is_empty() {
            debug!(
                retry_queue = self.retry_queue.len(),
                "Retry queue not drained, holding back full batches"
            );
            return report;
        }

        while self.signal.is_reachable() && !budget.is_exhausted() {
            let Some(batch) = self.batcher.next_full_batch(&self.buffer) else {
                break;
            };
            let outcome = self.deliver(batch, false, budget).await;
            report.merge(outcome);
            if outcome.batches_failed > 0 {
                break;
            }
        }
        report
    }

    async fn drain_retry_queue_locked(&self, budget: &RetryBudget) -> TickReport {
        let mut report = TickReport::default();
        // Only batches present now; failures re-appended below wait for the next pass
        let pending = self.retry_queue.len();
        if pending > 0 {
            info!(pending, "Draining retry queue");
        }

        for _ in 0..pending {
            if !self.signal.is_reachable() || budget.is_exhausted() {
                break;
            }
            let Some(batch) = self.retry_queue.pop() else {
                break;
            };
            let outcome = self.deliver(batch, true, budget).await;
            report.merge(outcome);
            // Broker is still down; leave the rest for the next pass
            if outcome.batches_failed > 0 {
                break;
            }
        }
        report
    }

    async fn deliver(&self, mut batch: Batch, from_retry_queue: bool, budget: &RetryBudget) -> TickReport {
        let payload = match self.compressor.compress_batch(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                error!(batch_id = %batch.id(), lines = batch.len(), error = %e, "Dropping batch that could not be compressed");
                return TickReport {
                    batches_failed: 1,
                    ..TickReport::default()
                };
            }
        };

        match self.publish_with_retry(&mut batch, &payload, budget).await {
            Ok(()) => TickReport {
                batches_published: 1,
                lines_published: batch.len(),
                ..TickReport::default()
            },
            Err(e) => {
                warn!(
                    batch_id = %batch.id(),
                    lines = batch.len(),
                    error = %e,
                    "Moving batch to retry queue"
                );
                if !from_retry_queue {
                    self.metrics.record_retry_queued();
                }
                self.retry_queue.push(batch);
                TickReport {
                    batches_failed: 1,
                    ..TickReport::default()
                }
            }
        }
    }

    /// Up to `max_attempts` publishes with the configured delay in between.
    /// Connection and publish errors are both retried; an exhausted `budget`
    /// ends the loop before the next attempt or delay.
    pub async fn publish_with_retry(
        &self,
        batch: &mut Batch,
        payload: &[u8],
        budget: &RetryBudget,
    ) -> Result<(), DeliveryError> {
        let max_attempts = self.publish_retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if budget.is_exhausted() {
                return Err(self.out_of_budget(batch, attempt - 1));
            }
            batch.record_attempt();
            self.set_state(EngineState::Publishing);

            match self.attempt_publish(payload, budget).await {
                Ok(()) => {
                    self.metrics.record_published(batch.len(), payload.len());
                    self.set_state(EngineState::Success);
                    info!(
                        batch_id = %batch.id(),
                        routing_key = %self.routing_key,
                        lines = batch.len(),
                        bytes = payload.len(),
                        attempt,
                        "Batch published"
                    );
                    return Ok(());
                }
                Err(ConnectionError::BudgetExhausted { .. }) => {
                    return Err(self.out_of_budget(batch, attempt));
                }
                Err(e) => {
                    self.metrics.record_publish_failure();
                    warn!(
                        batch_id = %batch.id(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if self.publish_retry.should_retry(attempt)
                && !budget.sleep(self.publish_retry.delay_for(attempt)).await
            {
                return Err(self.out_of_budget(batch, attempt));
            }
        }

        self.set_state(EngineState::Failed);
        Err(DeliveryError::RetriesExhausted {
            batch_id: batch.id().to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    fn out_of_budget(&self, batch: &Batch, attempts: u32) -> DeliveryError {
        self.set_state(EngineState::Failed);
        DeliveryError::BudgetExhausted {
            batch_id: batch.id().to_string(),
            attempts,
        }
    }

    async fn attempt_publish(&self, payload: &[u8], budget: &RetryBudget) -> Result<(), ConnectionError> {
        self.connection.ensure_connected_within(budget).await?;
        self.connection
            .publish(self.routing_key.as_str(), payload)
            .await
    }
}
