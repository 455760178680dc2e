//! Operator-side consumer: binds a durable queue to the log exchange and turns
//! compressed batches back into lines.

use crate::domain::{RoutingKey, ValidationError};
use crate::sender::{AckDecision, CompressionError, Compressor, Delivery, GatewayError, MessagingGateway};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Sink failed: {0}")]
    Sink(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TailStats {
    pub messages: u64,
    pub lines: u64,
    pub rejected: u64,
}

pub struct LogTail {
    gateway: Arc<dyn MessagingGateway>,
    queue: String,
    binding: String,
    compressor: Compressor,
}

impl LogTail {
    /// `binding` is any topic pattern, e.g. `log.*`.
    pub fn new(gateway: Arc<dyn MessagingGateway>, binding: impl Into<String>) -> Self {
        Self {
            gateway,
            queue: Self::default_queue(),
            binding: binding.into(),
            compressor: Compressor::new(),
        }
    }

    pub fn for_device(
        gateway: Arc<dyn MessagingGateway>,
        device_id: &str,
    ) -> Result<Self, ValidationError> {
        let key = RoutingKey::for_device(device_id)?;
        Ok(Self::new(gateway, key.as_str()))
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn default_queue() -> String {
        format!("device_logs_{}", std::process::id())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Consumes until `shutdown` fires or the subscription ends, handing
    /// each decoded batch to `sink` before acknowledging it.
    pub async fn run<F>(&self, mut sink: F, shutdown: CancellationToken) -> Result<TailStats, ConsumerError>
    where
        F: FnMut(&str, &[String]) -> std::io::Result<()> + Send,
    {
        if !self.gateway.is_connected() {
            self.gateway.connect().await?;
        }
        self.gateway.bind_queue(&self.queue, &self.binding).await?;
        let mut subscription = self.gateway.subscribe(&self.queue).await?;
        info!(queue = %self.queue, binding = %self.binding, "Tailing device logs");

        let mut stats = TailStats::default();
        let outcome = loop {
            let delivery = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                next = subscription.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        debug!(queue = %self.queue, "Subscription closed");
                        break Ok(());
                    }
                },
            };
            if let Err(e) = self.process(delivery, &mut sink, &mut stats).await {
                break Err(e);
            }
        };

        drop(subscription);
        if let Err(e) = self.gateway.unsubscribe(&self.queue).await {
            warn!(queue = %self.queue, error = %e, "Failed to cancel consumer");
        }
        outcome.map(|()| stats)
    }

    /// Decodes one delivery and settles it. Undecodable payloads are
    /// rejected without requeue; a sink failure requeues and is returned.
    pub async fn process<F>(
        &self,
        delivery: Delivery,
        sink: &mut F,
        stats: &mut TailStats,
    ) -> Result<AckDecision, ConsumerError>
    where
        F: FnMut(&str, &[String]) -> std::io::Result<()>,
    {
        let lines = match self.decode(&delivery.payload) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(topic = %delivery.topic, bytes = delivery.payload.len(), error = %e, "Rejecting undecodable message");
                stats.rejected += 1;
                delivery.reject(false).await?;
                return Ok(AckDecision::Reject { requeue: false });
            }
        };

        if let Err(e) = sink(&delivery.topic, &lines) {
            delivery.reject(true).await?;
            return Err(ConsumerError::Sink(e));
        }

        stats.messages += 1;
        stats.lines += lines.len() as u64;
        delivery.ack().await?;
        Ok(AckDecision::Ack)
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<String>, CompressionError> {
        self.compressor.decompress_lines(payload)
    }
}
