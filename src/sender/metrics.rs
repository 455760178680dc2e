use crate::buffer::{BufferStats, RetryQueue};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::net::SocketAddr;
#[cfg(feature = "metrics")]
use tokio_util::sync::CancellationToken;
#[cfg(feature = "metrics")]
use warp::{Filter, Reply};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    HttpError(String),
}

/// Point-in-time view of the pipeline's counters and depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub lines_submitted: u64,
    pub lines_dropped: u64,
    pub buffer_depth: usize,
    pub buffer_peak: usize,
    pub batches_published: u64,
    pub lines_published: u64,
    pub bytes_published: u64,
    pub publish_failures: u64,
    pub batches_retry_queued: u64,
    pub batches_expired: u64,
    pub lines_expired: u64,
    pub retry_queue_depth: usize,
    pub consecutive_failures: u64,
    pub connection_attempts: u64,
    pub connected: bool,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Lock-free delivery counters shared between the connection manager and the
/// delivery engine.
#[derive(Clone, Default)]
pub struct DeliveryMetrics {
    batches_published: Arc<AtomicU64>,
    lines_published: Arc<AtomicU64>,
    bytes_published: Arc<AtomicU64>,
    publish_failures: Arc<AtomicU64>,
    batches_retry_queued: Arc<AtomicU64>,
    consecutive_failures: Arc<AtomicU64>,
    connection_attempts: Arc<AtomicU64>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, lines: usize, bytes: usize) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
        self.lines_published
            .fetch_add(lines as u64, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_queued(&self) {
        self.batches_retry_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines_published(&self) -> u64 {
        self.lines_published.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(
        &self,
        buffer: BufferStats,
        retry_queue: &RetryQueue,
        connected: bool,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_submitted: buffer.submitted,
            lines_dropped: buffer.dropped,
            buffer_depth: buffer.len,
            buffer_peak: buffer.peak_len,
            batches_published: self.batches_published.load(Ordering::Relaxed),
            lines_published: self.lines_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            batches_retry_queued: self.batches_retry_queued.load(Ordering::Relaxed),
            batches_expired: retry_queue.expired_batches(),
            lines_expired: retry_queue.expired_lines(),
            retry_queue_depth: retry_queue.len(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connected,
        }
    }
}

#[cfg(feature = "metrics")]
pub type SnapshotSource = Arc<dyn Fn() -> MetricsSnapshot + Send + Sync>;

/// Mirrors [`MetricsSnapshot`] into a Prometheus registry on every scrape.
#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct PrometheusExporter {
    registry: Registry,
    source: SnapshotSource,
    counters: Vec<(IntCounter, fn(&MetricsSnapshot) -> u64)>,
    gauges: Vec<(IntGauge, fn(&MetricsSnapshot) -> i64)>,
}

#[cfg(feature = "metrics")]
impl PrometheusExporter {
    pub fn new(source: SnapshotSource) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let counter_defs: [(&str, &str, fn(&MetricsSnapshot) -> u64); 10] = [
            ("rask_lines_submitted_total", "Log lines accepted into the buffer", |s| s.lines_submitted),
            ("rask_lines_dropped_total", "Log lines evicted at the buffer high-water mark", |s| s.lines_dropped),
            ("rask_batches_published_total", "Batches confirmed by the broker", |s| s.batches_published),
            ("rask_lines_published_total", "Log lines confirmed by the broker", |s| s.lines_published),
            ("rask_bytes_published_total", "Compressed payload bytes confirmed by the broker", |s| s.bytes_published),
            ("rask_publish_failures_total", "Failed publish attempts", |s| s.publish_failures),
            ("rask_batches_retry_queued_total", "Batches moved to the retry queue", |s| s.batches_retry_queued),
            ("rask_batches_expired_total", "Batches expired from the bounded retry queue", |s| s.batches_expired),
            ("rask_lines_expired_total", "Log lines expired from the bounded retry queue", |s| s.lines_expired),
            ("rask_connection_attempts_total", "Broker connection attempts", |s| s.connection_attempts),
        ];
        let gauge_defs: [(&str, &str, fn(&MetricsSnapshot) -> i64); 4] = [
            ("rask_buffer_depth", "Log lines waiting in the buffer", |s| s.buffer_depth as i64),
            ("rask_retry_queue_depth", "Batches waiting in the retry queue", |s| s.retry_queue_depth as i64),
            ("rask_consecutive_failures", "Publish failures since the last success", |s| s.consecutive_failures as i64),
            ("rask_broker_connected", "1 while connected to the broker", |s| i64::from(s.connected)),
        ];

        let mut counters = Vec::with_capacity(counter_defs.len());
        for (name, help, read) in counter_defs {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            counters.push((counter, read));
        }

        let mut gauges = Vec::with_capacity(gauge_defs.len());
        for (name, help, read) in gauge_defs {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push((gauge, read));
        }

        Ok(Self {
            registry,
            source,
            counters,
            gauges,
        })
    }

    fn refresh(&self) -> MetricsSnapshot {
        let snapshot = (self.source)();
        for (counter, read) in &self.counters {
            let value = read(&snapshot);
            counter.inc_by(value.saturating_sub(counter.get()));
        }
        for (gauge, read) in &self.gauges {
            gauge.set(read(&snapshot));
        }
        snapshot
    }

    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        self.refresh();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Serves `/metrics` and `/health` until `shutdown` is cancelled.
    pub async fn serve(self, port: u16, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let exporter = self.clone();
        let metrics = warp::path!("metrics")
            .and(warp::get())
            .map(move || match exporter.export_metrics() {
                Ok(text) => {
                    warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4")
                        .into_response()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode metrics");
                    warp::reply::with_status(
                        "Internal Server Error",
                        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                    )
                    .into_response()
                }
            });

        let source = self.source.clone();
        let health = warp::path!("health")
            .and(warp::get())
            .map(move || warp::reply::json(&source()));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let (bound, server) = warp::serve(metrics.or(health))
            .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })
            .map_err(|e| MetricsError::HttpError(e.to_string()))?;

        tracing::info!(%bound, "Metrics endpoint listening");
        server.await;
        Ok(())
    }
}
