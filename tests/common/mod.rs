#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rask_log_shipper::pipeline::PipelineConfig;
use rask_log_shipper::reliability::RetryPolicy;
use rask_log_shipper::sender::{
    ConnectionConfig, Delivery, GatewayError, MessagingGateway, Subscription,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// In-memory topic exchange. Published messages are recorded and routed to
/// any bound queue that has a live subscription.
#[derive(Default)]
pub struct FakeGateway {
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    fail_publishes: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    bindings: Mutex<Vec<(String, String)>>,
    consumers: Mutex<HashMap<String, (mpsc::Sender<Delivery>, CancellationToken)>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Failing publishes also drop the connection, like a broker going away.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), GatewayError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }
        if self.fail_publishes.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(GatewayError::Publish("channel closed".into()));
        }
        self.published
            .lock()
            .push((routing_key.to_string(), payload.to_vec()));

        let targets: Vec<mpsc::Sender<Delivery>> = {
            let bindings = self.bindings.lock();
            let consumers = self.consumers.lock();
            bindings
                .iter()
                .filter(|(_, pattern)| topic_matches(pattern, routing_key))
                .filter_map(|(queue, _)| consumers.get(queue).map(|(tx, _)| tx.clone()))
                .collect()
        };
        for tx in targets {
            let _ = tx
                .send(Delivery::detached(routing_key, payload.to_vec()))
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription, GatewayError> {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        self.consumers
            .lock()
            .insert(queue.to_string(), (tx, cancel.clone()));
        Ok(Subscription::new(queue, rx, cancel))
    }

    async fn unsubscribe(&self, queue: &str) -> Result<bool, GatewayError> {
        let removed = self.consumers.lock().remove(queue);
        Ok(removed.is_some_and(|(_, cancel)| {
            cancel.cancel();
            true
        }))
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.connected.store(false, Ordering::SeqCst);
        self.consumers.lock().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn bind_queue(&self, queue: &str, routing_key: &str) -> Result<(), GatewayError> {
        self.bindings
            .lock()
            .push((queue.to_string(), routing_key.to_string()));
        Ok(())
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    fn walk(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                walk(&pattern[1..], topic) || (!topic.is_empty() && walk(pattern, &topic[1..]))
            }
            (Some(&"*"), Some(_)) => walk(&pattern[1..], &topic[1..]),
            (Some(p), Some(t)) if p == t => walk(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    walk(&pattern, &topic)
}

/// Small batches and millisecond delays so retries finish quickly.
pub fn fast_pipeline_config(device_id: &str, batch_size: usize) -> PipelineConfig {
    let mut config = PipelineConfig::new(device_id);
    config.buffer.batch_size = batch_size;
    config.batch_interval = Duration::from_secs(3600);
    config.publish_retry = RetryPolicy::fixed(3, Duration::from_millis(1));
    config.connection = ConnectionConfig {
        retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        connect_timeout: Duration::from_millis(200),
        publish_timeout: Duration::from_millis(200),
    };
    config
}

pub fn numbered_lines(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("line {i}")).collect()
}
