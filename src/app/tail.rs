use super::{AppError, DiagnosticLevel, SignalHandler, setup_logging_safe};
use crate::consumer::{LogTail, TailStats};
use crate::domain::RoutingKey;
use crate::sender::{AmqpGateway, AmqpSettings, MessagingGateway};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// Prints the logs shipped by one device (or any topic pattern).
#[derive(Parser, Clone)]
#[command(name = "rask-log-tail", author, version, about, long_about = None)]
pub struct TailConfig {
    /// Device whose logs to follow
    #[arg(env = "DEVICE_ID", required_unless_present = "pattern")]
    pub device_id: Option<String>,

    /// Raw binding pattern instead of `log.<device_id>`, e.g. `log.*`
    #[arg(long)]
    pub pattern: Option<String>,

    /// Queue name (defaults to `device_logs_<pid>`)
    #[arg(long, env = "TAIL_QUEUE")]
    pub queue: Option<String>,

    #[arg(long, env = "AMQP_HOST", default_value = "localhost")]
    pub broker_host: String,

    #[arg(long, env = "AMQP_PORT", default_value = "5672")]
    pub broker_port: u16,

    #[arg(long, env = "AMQP_USERNAME", default_value = "guest")]
    pub username: String,

    #[arg(long, env = "AMQP_PASSWORD", default_value = "guest", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "AMQP_VHOST", default_value = "/")]
    pub vhost: String,

    #[arg(long, env = "AMQP_EXCHANGE", default_value = "libs.monitoring")]
    pub exchange: String,

    /// Diagnostic log level (written to stderr)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: DiagnosticLevel,
}

impl std::fmt::Debug for TailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailConfig")
            .field("device_id", &self.device_id)
            .field("pattern", &self.pattern)
            .field("queue", &self.queue)
            .field("broker", &format_args!("{}:{}{}", self.broker_host, self.broker_port, self.vhost))
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl TailConfig {
    pub fn binding(&self) -> Result<String, AppError> {
        if let Some(pattern) = &self.pattern {
            return Ok(pattern.clone());
        }
        let device_id = self.device_id.as_deref().unwrap_or_default();
        let key = RoutingKey::for_device(device_id).map_err(super::ConfigError::from)?;
        Ok(key.to_string())
    }

    pub fn amqp_settings(&self) -> AmqpSettings {
        AmqpSettings {
            host: self.broker_host.clone(),
            port: self.broker_port,
            username: self.username.clone(),
            password: self.password.clone(),
            vhost: self.vhost.clone(),
            exchange: self.exchange.clone(),
        }
    }
}

pub struct TailApp {
    tail: LogTail,
    gateway: Arc<dyn MessagingGateway>,
}

impl TailApp {
    pub fn from_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = TailConfig::parse_from(args);
        if let Err(e) = setup_logging_safe(config.log_level) {
            eprintln!("Warning: {e}");
        }
        let gateway: Arc<dyn MessagingGateway> = Arc::new(AmqpGateway::new(config.amqp_settings()));
        Self::new(&config, gateway)
    }

    pub fn new(config: &TailConfig, gateway: Arc<dyn MessagingGateway>) -> Result<Self, AppError> {
        let mut tail = LogTail::new(gateway.clone(), config.binding()?);
        if let Some(queue) = &config.queue {
            tail = tail.with_queue(queue.clone());
        }
        Ok(Self { tail, gateway })
    }

    pub fn tail(&self) -> &LogTail {
        &self.tail
    }

    /// Prints every received line to stdout until a signal arrives.
    pub async fn run(self) -> Result<TailStats, AppError> {
        let signals = SignalHandler::new();
        let listener = signals.install();

        let stdout = std::io::stdout();
        let stats = self
            .tail
            .run(
                |_topic: &str, lines: &[String]| {
                    let mut out = stdout.lock();
                    for line in lines {
                        writeln!(out, "{line}")?;
                    }
                    out.flush()
                },
                signals.token(),
            )
            .await;

        listener.abort();
        if let Err(e) = self.gateway.disconnect().await {
            tracing::warn!(error = %e, "Error while closing broker connection");
        }

        let stats = stats?;
        info!(messages = stats.messages, lines = stats.lines, rejected = stats.rejected, "Tail finished");
        Ok(stats)
    }
}
