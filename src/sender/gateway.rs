use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Broker negatively acknowledged the message")]
    Nacked,
    #[error("Subscription failed: {0}")]
    Subscribe(String),
    #[error("Acknowledgement failed: {0}")]
    Acknowledge(String),
    #[error("Invalid broker settings: {0}")]
    InvalidSettings(String),
}

impl GatewayError {
    /// Whether the failure means the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, GatewayError::Connection(_) | GatewayError::NotConnected)
    }
}

/// Outcome reported back to the broker for a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Reject { requeue: bool },
}

pub type AckFuture = BoxFuture<'static, Result<(), GatewayError>>;
type Acker = Box<dyn FnOnce(AckDecision) -> AckFuture + Send>;

/// A consumed message. Must be settled with [`Delivery::ack`] or
/// [`Delivery::reject`]; dropping it leaves the message unacknowledged until
/// the channel closes.
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
    acker: Acker,
}

impl Delivery {
    pub fn new<F>(topic: impl Into<String>, payload: impl Into<Bytes>, acker: F) -> Self
    where
        F: FnOnce(AckDecision) -> AckFuture + Send + 'static,
    {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            acker: Box::new(acker),
        }
    }

    /// Delivery whose settlement is a no-op.
    pub fn detached(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(topic, payload, |_| Box::pin(async { Ok(()) }))
    }

    pub async fn ack(self) -> Result<(), GatewayError> {
        (self.acker)(AckDecision::Ack).await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), GatewayError> {
        (self.acker)(AckDecision::Reject { requeue }).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries for one queue. Dropping the subscription stops the
/// background consumer pump.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        receiver: mpsc::Receiver<Delivery>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: queue.into(),
            receiver,
            cancel,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the consumer has been cancelled or the
    /// connection dropped.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publish/subscribe broker connection.
///
/// Implementations must be safe to share across tasks. `connect` is a no-op
/// when already connected; any error from `connect` or `disconnect` leaves the
/// gateway in the "not connected" state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn connect(&self) -> Result<(), GatewayError>;

    /// Publishes a persistent message. `Ok` means the broker accepted it.
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), GatewayError>;

    async fn subscribe(&self, queue: &str) -> Result<Subscription, GatewayError>;

    /// Returns whether an active consumer was cancelled.
    async fn unsubscribe(&self, queue: &str) -> Result<bool, GatewayError>;

    async fn disconnect(&self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Declares `queue` durable and binds it to the exchange under `routing_key`.
    async fn bind_queue(&self, queue: &str, routing_key: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_delivery_routes_decision_to_acker() {
        let acked = Arc::new(AtomicBool::new(false));
        let flag = acked.clone();
        let delivery = Delivery::new("log.dev-1", vec![1u8, 2, 3], move |decision| {
            Box::pin(async move {
                flag.store(decision == AckDecision::Ack, Ordering::SeqCst);
                Ok(())
            })
        });

        assert_eq!(delivery.payload.len(), 3);
        delivery.ack().await.unwrap();
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_subscription_cancels_pump() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let subscription = Subscription::new("q", rx, token.clone());
        assert!(!token.is_cancelled());
        drop(subscription);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(GatewayError::NotConnected.is_connection_error());
        assert!(!GatewayError::Nacked.is_connection_error());
    }
}
