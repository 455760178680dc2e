use super::gateway::{GatewayError, MessagingGateway};
use super::metrics::DeliveryMetrics;
use crate::reliability::{RetryBudget, RetryPolicy};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to connect after {attempts} attempts: {last_error}")]
    MaxConnectionAttempts { attempts: u32, last_error: String },
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),
    #[error("Gave up connecting after {attempts} attempts: retry budget exhausted")]
    BudgetExhausted { attempts: u32 },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Attempts per `ensure_connected` call and the delay between them.
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            connect_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(30),
        }
    }
}

/// Sole owner of the gateway connection.
///
/// Connect, disconnect and publish all run under one async lock, so a publish
/// never observes a half-built connection and a disconnect never interleaves
/// with a connect.
pub struct ConnectionManager {
    gateway: Arc<dyn MessagingGateway>,
    config: ConnectionConfig,
    lock: Mutex<()>,
    state: RwLock<ConnectionState>,
    metrics: DeliveryMetrics,
}

impl ConnectionManager {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        config: ConnectionConfig,
        metrics: DeliveryMetrics,
    ) -> Self {
        Self {
            gateway,
            config,
            lock: Mutex::new(()),
            state: RwLock::new(ConnectionState::Disconnected),
            metrics,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn MessagingGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.gateway.is_connected()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = ?*current, to = ?state, "Connection state changed");
            *current = state;
        }
    }

    pub async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        self.ensure_connected_within(&RetryBudget::unlimited()).await
    }

    /// Like [`ConnectionManager::ensure_connected`], but starts no attempt
    /// and no delay once `budget` is exhausted.
    pub async fn ensure_connected_within(&self, budget: &RetryBudget) -> Result<(), ConnectionError> {
        if self.gateway.is_connected() {
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        // Another caller may have connected while we waited
        if self.gateway.is_connected() {
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }
        self.connect_locked(budget).await
    }

    async fn connect_locked(&self, budget: &RetryBudget) -> Result<(), ConnectionError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if budget.is_exhausted() {
                return Err(self.give_up(attempt - 1));
            }
            self.set_state(ConnectionState::Connecting);
            self.metrics.record_connection_attempt();
            let outcome =
                tokio::time::timeout(self.config.connect_timeout, self.gateway.connect()).await;

            let error = match outcome {
                Ok(Ok(())) => {
                    self.set_state(ConnectionState::Connected);
                    info!(attempt, "Broker connection established");
                    return Ok(());
                }
                Ok(Err(e)) => ConnectionError::Gateway(e),
                Err(_) => ConnectionError::ConnectTimeout(self.config.connect_timeout),
            };

            warn!(attempt, max_attempts, error = %error, "Broker connection attempt failed");
            last_error = error.to_string();

            if self.config.retry.should_retry(attempt)
                && !budget.sleep(self.config.retry.delay_for(attempt)).await
            {
                return Err(self.give_up(attempt));
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(ConnectionError::MaxConnectionAttempts {
            attempts: max_attempts,
            last_error,
        })
    }

    fn give_up(&self, attempts: u32) -> ConnectionError {
        self.set_state(ConnectionState::Disconnected);
        debug!(attempts, "Retry budget exhausted, not reconnecting");
        ConnectionError::BudgetExhausted { attempts }
    }

    /// Publishes with the configured timeout. Connection is not established
    /// here; call [`ConnectionManager::ensure_connected`] first.
    pub async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), ConnectionError> {
        let _guard = self.lock.lock().await;
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(timeout, self.gateway.publish(routing_key, payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if e.is_connection_error() || !self.gateway.is_connected() {
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(ConnectionError::Gateway(e))
            }
            Err(_) => Err(ConnectionError::PublishTimeout(timeout)),
        }
    }

    /// Closes the gateway. State is `Disconnected` afterwards whether or not
    /// the close succeeded.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let _guard = self.lock.lock().await;
        let result = self.gateway.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        result.map_err(ConnectionError::from)
    }
}
