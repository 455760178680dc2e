pub mod config;
pub mod logging_system;
pub mod shutdown;
pub mod tail;

pub use config::{CONFIG_ENV_VAR, Config, ConfigError, DiagnosticLevel, LogFormat, ShutdownMode};
pub use logging_system::{
    LoggingError, LoggingSystem, setup_logging_safe, setup_logging_with_format,
};
pub use shutdown::{ShutdownSignal, SignalHandler, wait_for_signal};
pub use tail::{TailApp, TailConfig};

use crate::consumer::ConsumerError;
use crate::domain::LogLevel;
use crate::logger::Logger;
use crate::pipeline::{Pipeline, PipelineError, ShutdownReport};
use crate::sender::{AmqpGateway, MetricsError};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tag used for stdin lines that do not carry their own level and tag.
pub const STDIN_TAG: &str = "stdin";

/// The shipper process: stdin in, batches out.
pub struct App {
    config: Config,
    pipeline: Arc<Pipeline>,
    signals: SignalHandler,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, AppError> {
        if let Err(e) = setup_logging_with_format(config.log_level, config.log_format) {
            eprintln!("Warning: {e}");
        }

        let gateway = Arc::new(AmqpGateway::new(config.amqp_settings()));
        let pipeline = Arc::new(Pipeline::new(config.pipeline_config()?, gateway)?);

        info!("Starting rask-log-shipper v{}", crate::VERSION);
        info!(
            device_id = %pipeline.config().device_id,
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            exchange = %config.exchange,
            batch_size = config.batch_size,
            "Configuration loaded"
        );

        Ok(Self {
            config,
            pipeline,
            signals: SignalHandler::new(),
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub async fn run(self) -> Result<ShutdownReport, AppError> {
        let shutdown = self.signals.token();
        let listener = self.signals.install();

        self.spawn_metrics_server(shutdown.child_token())?;
        self.pipeline.start()?;

        let logger = self.pipeline.logger();
        let signals = self.signals.clone();
        let reader = tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            let result = ingest(stdin, &logger, signals.token()).await;
            if let Err(e) = &result {
                error!(error = %e, "Failed to read stdin");
            }
            // End of input ends the process like a signal would
            signals.trigger();
            result
        });

        info!("rask-log-shipper is running. Press Ctrl+C to stop.");
        shutdown.cancelled().await;

        let report = self.pipeline.stop().await?;
        listener.abort();
        reader.abort();

        info!(
            delivered = report.delivered_lines,
            abandoned = report.abandoned_lines,
            "rask-log-shipper stopped"
        );
        Ok(report)
    }

    #[cfg(feature = "metrics")]
    fn spawn_metrics_server(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        use crate::sender::PrometheusExporter;

        if !self.config.enable_metrics {
            return Ok(());
        }
        let pipeline = self.pipeline.clone();
        let exporter = PrometheusExporter::new(Arc::new(move || pipeline.metrics()))?;
        let port = self.config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = exporter.serve(port, shutdown).await {
                warn!(port, error = %e, "Metrics endpoint stopped");
            }
        });
        info!(port, "Metrics endpoint enabled");
        Ok(())
    }

    #[cfg(not(feature = "metrics"))]
    fn spawn_metrics_server(&self, _shutdown: CancellationToken) -> Result<(), AppError> {
        if self.config.enable_metrics {
            warn!("Metrics requested but the binary was built without the `metrics` feature");
        }
        Ok(())
    }
}

/// Feeds every line of `input` into `logger` until EOF or cancellation.
/// Returns the number of lines read.
pub async fn ingest<R>(input: R, logger: &Logger, cancel: CancellationToken) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut count = 0u64;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            debug!(lines = count, "End of input");
            break;
        };
        count += 1;
        ingest_line(logger, &line);
    }
    Ok(count)
}

/// `<L> <tag>: <message>` lines keep their level and tag; anything else is
/// logged at Info under [`STDIN_TAG`]. Blank lines are skipped.
pub fn ingest_line(logger: &Logger, line: &str) {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return;
    }
    if let Some((label, rest)) = line.split_once(' ')
        && LogLevel::is_supported(label)
        && let Some((tag, message)) = rest.split_once(": ")
        && !tag.is_empty()
        && logger.submit_raw(label, tag, message).is_ok()
    {
        return;
    }
    logger.i(STDIN_TAG, line);
}

/// Entry point of the `rask-log-shipper` binary.
pub async fn main() -> Result<ShutdownReport, AppError> {
    App::from_args(std::env::args_os())?.run().await
}
