use super::engine::{DeliveryEngine, DeliveryEngineParts, TickReport};
use crate::app::ConfigError;
use crate::buffer::{BufferConfig, LogBuffer, RetryQueue};
use crate::domain::{LogLevel, RoutingKey};
use crate::logger::Logger;
use crate::network::{NetworkMonitor, ReachabilitySignal, TcpProbe};
use crate::reliability::{RetryBudget, RetryPolicy};
use crate::sender::{
    ConnectionConfig, ConnectionManager, DeliveryMetrics, MessagingGateway, MetricsSnapshot,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,
    #[error("Pipeline is not running")]
    NotRunning,
    #[error("Scheduling loop terminated abnormally: {0}")]
    Join(String),
}

/// What to do with undelivered content on `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Keep delivering until everything is out or `timeout` elapses.
    Drain { timeout: Duration },
    Abandon,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        ShutdownPolicy::Drain {
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub delivered_lines: usize,
    pub abandoned_lines: usize,
    pub abandoned_batches: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub device_id: String,
    pub buffer: BufferConfig,
    pub batch_interval: Duration,
    pub publish_retry: RetryPolicy,
    pub connection: ConnectionConfig,
    pub retry_queue_max_batches: Option<usize>,
    pub shutdown_policy: ShutdownPolicy,
    pub min_level: LogLevel,
    pub console_echo: bool,
    /// Spawned with the scheduling loop when set.
    pub probe: Option<TcpProbe>,
}

impl PipelineConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            buffer: BufferConfig::default(),
            batch_interval: Duration::from_secs(10),
            publish_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            connection: ConnectionConfig::default(),
            retry_queue_max_batches: None,
            shutdown_policy: ShutdownPolicy::default(),
            min_level: LogLevel::Verbose,
            console_echo: false,
            probe: None,
        }
    }

    /// Checks everything needed to run and returns the derived routing key.
    pub fn validate(&self) -> Result<RoutingKey, ConfigError> {
        let routing_key = RoutingKey::for_device(&self.device_id)?;

        if self.buffer.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if let Some(limit) = self.buffer.high_water_mark
            && limit < self.buffer.batch_size
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer high-water mark ({limit}) must be at least the batch size ({})",
                self.buffer.batch_size
            )));
        }
        if self.batch_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Batch interval must be greater than 0".to_string(),
            ));
        }
        if self.connection.connect_timeout.is_zero() || self.connection.publish_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Connection and publish timeouts must be greater than 0".to_string(),
            ));
        }
        self.publish_retry
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("publish retry: {e}")))?;
        self.connection
            .retry
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("connection retry: {e}")))?;

        Ok(routing_key)
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    probe: Option<JoinHandle<()>>,
}

/// Owns the whole delivery pipeline: buffer, retry queue, connection manager,
/// network monitor and the scheduling loop.
pub struct Pipeline {
    config: PipelineConfig,
    buffer: LogBuffer,
    retry_queue: RetryQueue,
    connection: Arc<ConnectionManager>,
    engine: Arc<DeliveryEngine>,
    monitor: Arc<NetworkMonitor>,
    drain_trigger: Arc<Notify>,
    metrics: DeliveryMetrics,
    logger: Logger,
    running: Mutex<Option<RunningLoop>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Result<Self, ConfigError> {
        let routing_key = config.validate()?;

        let metrics = DeliveryMetrics::new();
        let buffer = LogBuffer::new(config.buffer.clone());
        let retry_queue = RetryQueue::new(config.retry_queue_max_batches);
        let signal = ReachabilitySignal::default();
        let drain_trigger = Arc::new(Notify::new());
        let monitor = Arc::new(NetworkMonitor::new(signal.clone(), drain_trigger.clone()));
        let connection = Arc::new(ConnectionManager::new(
            gateway,
            config.connection.clone(),
            metrics.clone(),
        ));

        let engine = Arc::new(DeliveryEngine::new(DeliveryEngineParts {
            connection: connection.clone(),
            buffer: buffer.clone(),
            retry_queue: retry_queue.clone(),
            signal,
            routing_key,
            publish_retry: config.publish_retry.clone(),
            metrics: metrics.clone(),
        }));
        let logger = Logger::new(buffer.clone(), config.min_level, config.console_echo);

        Ok(Self {
            config,
            buffer,
            retry_queue,
            connection,
            engine,
            monitor,
            drain_trigger,
            metrics,
            logger,
            running: Mutex::new(None),
        })
    }

    /// Ingestion entry point for an already formatted line. Never blocks.
    pub fn submit(&self, line: impl Into<String>) {
        self.buffer.enqueue(line);
    }

    pub fn logger(&self) -> Logger {
        self.logger.clone()
    }

    pub fn network_monitor(&self) -> Arc<NetworkMonitor> {
        self.monitor.clone()
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.buffer.stats(),
            &self.retry_queue,
            self.connection.is_connected(),
        )
    }

    /// Spawns the scheduling loop. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let probe = self
            .config
            .probe
            .clone()
            .map(|probe| probe.spawn(self.monitor.clone(), cancel.child_token()));

        let handle = tokio::spawn(scheduling_loop(LoopContext {
            engine: self.engine.clone(),
            connection: self.connection.clone(),
            buffer: self.buffer.clone(),
            drain_trigger: self.drain_trigger.clone(),
            metrics: self.metrics.clone(),
            retry_queue: self.retry_queue.clone(),
            interval: self.config.batch_interval,
            cancel: cancel.clone(),
        }));

        info!(
            routing_key = %self.engine.routing_key(),
            batch_size = self.config.buffer.batch_size,
            interval_ms = self.config.batch_interval.as_millis() as u64,
            "Delivery pipeline started"
        );
        *running = Some(RunningLoop {
            cancel,
            handle,
            probe,
        });
        Ok(())
    }

    /// Stops the loop, applies the shutdown policy, then closes the gateway.
    pub async fn stop(&self) -> Result<ShutdownReport, PipelineError> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Err(PipelineError::NotRunning);
        };

        running.cancel.cancel();
        // A pass in flight stops at its next attempt boundary
        let joined = running.handle.await;
        if let Some(probe) = running.probe
            && let Err(e) = probe.await
        {
            warn!(error = %e, "Reachability probe terminated abnormally");
        }

        let report = match self.config.shutdown_policy {
            ShutdownPolicy::Drain { timeout } => self.drain(timeout).await,
            ShutdownPolicy::Abandon => self.abandon(ShutdownReport::default()),
        };

        if let Err(e) = self.connection.disconnect().await {
            warn!(error = %e, "Error while closing broker connection");
        }

        info!(
            delivered_lines = report.delivered_lines,
            abandoned_lines = report.abandoned_lines,
            abandoned_batches = report.abandoned_batches,
            "Delivery pipeline stopped"
        );

        joined.map_err(|e| PipelineError::Join(e.to_string()))?;
        Ok(report)
    }

    /// Ticks until both queues are empty. No attempt or retry delay starts
    /// after `timeout`; an attempt already running is allowed to finish.
    async fn drain(&self, timeout: Duration) -> ShutdownReport {
        let budget = RetryBudget::until(Instant::now() + timeout);
        let mut report = ShutdownReport::default();

        while !budget.is_exhausted() && (!self.buffer.is_empty() || !self.retry_queue.is_empty()) {
            let tick = self.engine.tick_within(&budget).await;
            report.delivered_lines += tick.lines_published;
            if made_no_progress(&tick) {
                debug!(?tick, "Shutdown drain made no progress, giving up");
                break;
            }
        }
        self.abandon(report)
    }

    fn abandon(&self, mut report: ShutdownReport) -> ShutdownReport {
        let batches = self.retry_queue.take_all();
        report.abandoned_batches = batches.len();
        report.abandoned_lines =
            batches.iter().map(|b| b.len()).sum::<usize>() + self.buffer.clear();

        if report.abandoned_lines > 0 {
            warn!(
                lines = report.abandoned_lines,
                batches = report.abandoned_batches,
                "Abandoning undelivered log lines"
            );
        }
        report
    }
}

fn made_no_progress(tick: &TickReport) -> bool {
    tick.skipped || tick.batches_published == 0
}

struct LoopContext {
    engine: Arc<DeliveryEngine>,
    connection: Arc<ConnectionManager>,
    buffer: LogBuffer,
    drain_trigger: Arc<Notify>,
    metrics: DeliveryMetrics,
    retry_queue: RetryQueue,
    interval: Duration,
    cancel: CancellationToken,
}

async fn scheduling_loop(ctx: LoopContext) {
    // Best-effort connect up front; failures are retried by the first publish
    tokio::select! {
        () = ctx.cancel.cancelled() => return,
        result = ctx.connection.ensure_connected() => {
            if let Err(e) = result {
                warn!(error = %e, "Initial broker connection failed");
            }
        }
    }

    let budget = RetryBudget::until_cancelled(ctx.cancel.clone());
    let mut ticker = tokio::time::interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            () = ctx.drain_trigger.notified() => {
                ctx.engine.drain_retry_queue_within(&budget).await;
            }
            () = ctx.buffer.wait_full() => {
                ctx.engine.flush_full_batches_within(&budget).await;
            }
            _ = ticker.tick() => {
                let report = ctx.engine.tick_within(&budget).await;
                let snapshot = ctx.metrics.snapshot(
                    ctx.buffer.stats(),
                    &ctx.retry_queue,
                    ctx.connection.is_connected(),
                );
                match snapshot.to_json() {
                    Ok(metrics) => debug!(?report, %metrics, "Scheduled tick complete"),
                    Err(e) => debug!(?report, error = %e, "Scheduled tick complete"),
                }
            }
        }
    }
    debug!("Scheduling loop stopped");
}
