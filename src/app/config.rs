use crate::buffer::BufferConfig;
use crate::domain::{LogLevel, ValidationError};
use crate::network::TcpProbe;
use crate::pipeline::{PipelineConfig, ShutdownPolicy};
use crate::reliability::{RetryPolicy, RetryStrategy};
use crate::sender::{AmqpSettings, ConnectionConfig};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Whole-file TOML configuration passed through the environment.
pub const CONFIG_ENV_VAR: &str = "RASK_SHIPPER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Verbosity of the shipper's own diagnostics, unrelated to device log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl DiagnosticLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Trace => "trace",
        }
    }
}

impl From<DiagnosticLevel> for tracing::Level {
    fn from(level: DiagnosticLevel) -> Self {
        match level {
            DiagnosticLevel::Error => tracing::Level::ERROR,
            DiagnosticLevel::Warn => tracing::Level::WARN,
            DiagnosticLevel::Info => tracing::Level::INFO,
            DiagnosticLevel::Debug => tracing::Level::DEBUG,
            DiagnosticLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Keep delivering until empty or the shutdown timeout elapses
    #[default]
    Drain,
    /// Discard whatever is still buffered
    Abandon,
}

#[derive(Parser, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Broker host
    #[arg(long, env = "AMQP_HOST", default_value = "localhost")]
    pub broker_host: String,

    /// Broker port
    #[arg(long, env = "AMQP_PORT", default_value = "5672")]
    pub broker_port: u16,

    /// Broker username
    #[arg(long, env = "AMQP_USERNAME", default_value = "guest")]
    pub username: String,

    /// Broker password
    #[arg(long, env = "AMQP_PASSWORD", default_value = "guest", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub password: String,

    /// Broker virtual host
    #[arg(long, env = "AMQP_VHOST", default_value = "/")]
    pub vhost: String,

    /// Topic exchange the logs are published to
    #[arg(long, env = "AMQP_EXCHANGE", default_value = "libs.monitoring")]
    pub exchange: String,

    /// Device identity; routing key becomes `log.<device_id>`
    #[arg(long, env = "DEVICE_ID")]
    pub device_id: Option<String>,

    /// Use the host name when no device id is configured
    #[arg(long, env = "DEVICE_ID_FROM_HOSTNAME")]
    pub device_id_from_hostname: bool,

    /// Lowest device log level accepted by the logger
    #[arg(long, env = "MIN_LOG_LEVEL", default_value = "verbose")]
    pub min_log_level: LogLevel,

    /// Mirror accepted device log records to the shipper's own output
    #[arg(long, env = "CONSOLE_ECHO")]
    pub console_echo: bool,

    /// Lines per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "20")]
    pub batch_size: usize,

    /// Delivery tick interval in milliseconds
    #[arg(long, env = "BATCH_INTERVAL_MS", default_value = "10000")]
    pub batch_interval_ms: u64,

    /// Publish attempts per batch before it moves to the retry queue
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Delay between publish attempts in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "5000")]
    pub retry_delay_ms: u64,

    /// How retry delays grow between attempts (publish and connect)
    #[arg(long, env = "RETRY_STRATEGY", default_value = "fixed")]
    pub retry_strategy: RetryStrategy,

    /// Upper bound for a single retry delay in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "60000")]
    pub retry_max_delay_ms: u64,

    /// Randomize retry delays by ±50% (still capped by the max delay)
    #[arg(long, env = "RETRY_JITTER")]
    pub retry_jitter: bool,

    /// Connection attempts per connect cycle
    #[arg(long, env = "CONNECT_ATTEMPTS", default_value = "3")]
    pub connect_attempts: u32,

    /// Delay between connection attempts in milliseconds
    #[arg(long, env = "CONNECT_RETRY_DELAY_MS", default_value = "5000")]
    pub connect_retry_delay_ms: u64,

    /// Timeout for a single connection attempt in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "30")]
    pub connect_timeout_secs: u64,

    /// Timeout for a single publish in seconds
    #[arg(long, env = "PUBLISH_TIMEOUT_SECS", default_value = "30")]
    pub publish_timeout_secs: u64,

    /// Buffered lines kept before the oldest are dropped (0 = unbounded)
    #[arg(long, env = "BUFFER_HIGH_WATER_MARK", default_value = "100000")]
    pub buffer_high_water_mark: usize,

    /// Failed batches kept for retry (0 = unbounded)
    #[arg(long, env = "RETRY_QUEUE_MAX_BATCHES", default_value = "0")]
    pub retry_queue_max_batches: usize,

    /// What happens to undelivered lines on shutdown
    #[arg(long, env = "SHUTDOWN_POLICY", default_value = "drain")]
    pub shutdown_policy: ShutdownMode,

    /// Upper bound for the shutdown drain in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    pub shutdown_timeout_secs: u64,

    /// Broker reachability probe interval in milliseconds (0 disables)
    #[arg(long, env = "PROBE_INTERVAL_MS", default_value = "5000")]
    pub probe_interval_ms: u64,

    /// Diagnostic log level of the shipper itself
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: DiagnosticLevel,

    /// Diagnostic output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Enable the metrics endpoint
    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Metrics endpoint port
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange: "libs.monitoring".to_string(),
            device_id: None,
            device_id_from_hostname: false,
            min_log_level: LogLevel::Verbose,
            console_echo: false,
            batch_size: 20,
            batch_interval_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 5000,
            retry_strategy: RetryStrategy::Fixed,
            retry_max_delay_ms: 60_000,
            retry_jitter: false,
            connect_attempts: 3,
            connect_retry_delay_ms: 5000,
            connect_timeout_secs: 30,
            publish_timeout_secs: 30,
            buffer_high_water_mark: 100_000,
            retry_queue_max_batches: 0,
            shutdown_policy: ShutdownMode::Drain,
            shutdown_timeout_secs: 10,
            probe_interval_ms: 5000,
            log_level: DiagnosticLevel::Info,
            log_format: LogFormat::Compact,
            enable_metrics: false,
            metrics_port: 9090,
            config_file: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("broker", &format_args!("{}:{}{}", self.broker_host, self.broker_port, self.vhost))
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("exchange", &self.exchange)
            .field("device_id", &self.device_id)
            .field("batch_size", &self.batch_size)
            .field("batch_interval_ms", &self.batch_interval_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_strategy", &self.retry_strategy)
            .field("shutdown_policy", &self.shutdown_policy)
            .finish_non_exhaustive()
    }
}

/// Copies `$field` from `$base` wherever the parsed value is still the default.
macro_rules! overlay_defaults {
    ($config:ident, $base:ident, $defaults:ident; $($field:ident),+ $(,)?) => {
        $(
            if $config.$field == $defaults.$field {
                $config.$field = $base.$field.clone();
            }
        )+
    };
}

impl Config {
    /// Parses CLI arguments (with env fallbacks) and overlays them on
    /// `RASK_SHIPPER_CONFIG` or `--config-file` when present.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);

        let base = if let Ok(raw) = std::env::var(CONFIG_ENV_VAR) {
            Some(toml::from_str::<Config>(&raw)?)
        } else if let Some(path) = &config.config_file {
            Some(Self::read_file(path)?)
        } else {
            None
        };
        if let Some(base) = base {
            config.overlay(base);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(raw)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Fields left at their default take the value from `base`.
    fn overlay(&mut self, base: Config) {
        let defaults = Config::default();
        if self.device_id.is_none() {
            self.device_id = base.device_id.clone();
        }
        self.device_id_from_hostname |= base.device_id_from_hostname;
        self.console_echo |= base.console_echo;
        self.enable_metrics |= base.enable_metrics;
        self.retry_jitter |= base.retry_jitter;
        overlay_defaults!(self, base, defaults;
            broker_host, broker_port, username, password, vhost, exchange,
            min_log_level, batch_size, batch_interval_ms, max_retries, retry_delay_ms,
            retry_strategy, retry_max_delay_ms, connect_attempts, connect_retry_delay_ms,
            connect_timeout_secs, publish_timeout_secs, buffer_high_water_mark, retry_queue_max_batches,
            shutdown_policy, shutdown_timeout_secs, probe_interval_ms, log_level,
            log_format, metrics_port,
        );
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        let configured = self
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        self.device_id = match configured {
            Some(id) => Some(id),
            None if self.device_id_from_hostname => Some(Self::hostname_device_id()?),
            None => None,
        };
        Ok(())
    }

    fn hostname_device_id() -> Result<String, ConfigError> {
        let raw = hostname::get()
            .map_err(|e| ConfigError::EnvError(format!("Could not read host name: {e}")))?;
        raw.to_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::EnvError("Host name is not valid UTF-8".to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let device_id = self.device_id()?;
        crate::domain::RoutingKey::for_device(device_id)?;

        if self.broker_host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Broker host must not be empty".to_string(),
            ));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "Broker port must be greater than 0".to_string(),
            ));
        }
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Exchange name must not be empty".to_string(),
            ));
        }

        let positive = [
            ("Batch size", self.batch_size as u64),
            ("Batch interval", self.batch_interval_ms),
            ("Max retries", u64::from(self.max_retries)),
            ("Connect attempts", u64::from(self.connect_attempts)),
            ("Connect timeout", self.connect_timeout_secs),
            ("Publish timeout", self.publish_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.buffer_high_water_mark != 0 && self.buffer_high_water_mark < self.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer high-water mark ({}) must be at least as large as batch size ({})",
                self.buffer_high_water_mark, self.batch_size
            )));
        }

        Ok(())
    }

    pub fn device_id(&self) -> Result<&str, ConfigError> {
        match self.device_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ValidationError::EmptyDeviceId.into()),
        }
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

    pub fn shutdown(&self) -> ShutdownPolicy {
        match self.shutdown_policy {
            ShutdownMode::Drain => ShutdownPolicy::Drain {
                timeout: Duration::from_secs(self.shutdown_timeout_secs),
            },
            ShutdownMode::Abandon => ShutdownPolicy::Abandon,
        }
    }

    /// The cap never sits below the base delay, so a long fixed delay stays valid.
    fn retry_policy(&self, max_attempts: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms.max(delay_ms)),
            strategy: self.retry_strategy,
            jitter: self.retry_jitter,
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut pipeline = PipelineConfig::new(self.device_id()?);
        pipeline.buffer = BufferConfig {
            batch_size: self.batch_size,
            high_water_mark: (self.buffer_high_water_mark > 0)
                .then_some(self.buffer_high_water_mark),
        };
        pipeline.batch_interval = Duration::from_millis(self.batch_interval_ms);
        pipeline.publish_retry = self.retry_policy(self.max_retries, self.retry_delay_ms);
        pipeline.connection = ConnectionConfig {
            retry: self.retry_policy(self.connect_attempts, self.connect_retry_delay_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
        };
        pipeline.retry_queue_max_batches =
            (self.retry_queue_max_batches > 0).then_some(self.retry_queue_max_batches);
        pipeline.shutdown_policy = self.shutdown();
        pipeline.min_level = self.min_log_level;
        pipeline.console_echo = self.console_echo;
        pipeline.probe = (self.probe_interval_ms > 0).then(|| {
            TcpProbe::new(
                &self.broker_host,
                self.broker_port,
                Duration::from_millis(self.probe_interval_ms),
            )
        });
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_device(id: &str) -> Config {
        Config {
            device_id: Some(id.to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_missing_device_id_is_fatal() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(ValidationError::EmptyDeviceId))
        ));
    }

    #[test]
    fn test_device_id_is_trimmed() {
        let mut config = config_with_device("  dev-7 ");
        config.post_process().unwrap();
        assert_eq!(config.device_id().unwrap(), "dev-7");
    }

    #[test]
    fn test_whitespace_device_id_without_fallback_stays_empty() {
        let mut config = config_with_device("   ");
        config.post_process().unwrap();
        assert!(config.device_id.is_none());
    }

    #[test]
    fn test_hostname_fallback() {
        let mut config = Config {
            device_id_from_hostname: true,
            ..Config::default()
        };
        config.post_process().unwrap();
        assert!(config.device_id.is_some());
    }

    #[test]
    fn test_rejects_high_water_mark_below_batch_size() {
        let config = Config {
            batch_size: 50,
            buffer_high_water_mark: 10,
            ..config_with_device("dev-1")
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        let unbounded = Config {
            batch_size: 50,
            buffer_high_water_mark: 0,
            ..config_with_device("dev-1")
        };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_values() {
        let cases = [
            Config { batch_size: 0, ..config_with_device("d") },
            Config { max_retries: 0, ..config_with_device("d") },
            Config { connect_attempts: 0, ..config_with_device("d") },
            Config { batch_interval_ms: 0, ..config_with_device("d") },
            Config { publish_timeout_secs: 0, ..config_with_device("d") },
            Config { broker_port: 0, ..config_with_device("d") },
            Config { exchange: String::new(), ..config_with_device("d") },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_pipeline_config_mapping() {
        let config = Config {
            batch_size: 5,
            retry_queue_max_batches: 0,
            probe_interval_ms: 0,
            shutdown_policy: ShutdownMode::Abandon,
            ..config_with_device("dev-1")
        };
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.device_id, "dev-1");
        assert_eq!(pipeline.buffer.batch_size, 5);
        assert_eq!(pipeline.buffer.high_water_mark, Some(100_000));
        assert_eq!(pipeline.retry_queue_max_batches, None);
        assert_eq!(pipeline.publish_retry, RetryPolicy {
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::fixed(3, Duration::from_secs(5))
        });
        assert_eq!(pipeline.connection.connect_timeout, Duration::from_secs(30));
        assert_eq!(pipeline.shutdown_policy, ShutdownPolicy::Abandon);
        assert!(pipeline.probe.is_none());
    }

    #[test]
    fn test_retry_strategy_reaches_both_policies() {
        let config = Config {
            retry_strategy: RetryStrategy::Exponential,
            retry_jitter: true,
            retry_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            connect_retry_delay_ms: 500,
            ..config_with_device("dev-1")
        };
        let pipeline = config.pipeline_config().unwrap();

        let publish = &pipeline.publish_retry;
        assert_eq!(publish.strategy, RetryStrategy::Exponential);
        assert!(publish.jitter);
        assert_eq!(publish.max_delay, Duration::from_secs(8));
        assert!(publish.delay_for(10) <= Duration::from_secs(8));

        let connect = &pipeline.connection.retry;
        assert_eq!(connect.strategy, RetryStrategy::Exponential);
        assert_eq!(connect.base_delay, Duration::from_millis(500));
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_max_delay_never_undercuts_a_long_fixed_delay() {
        let config = Config {
            retry_delay_ms: 120_000,
            retry_max_delay_ms: 60_000,
            ..config_with_device("dev-1")
        };
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.publish_retry.delay_for(1), Duration::from_secs(120));
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_retry_strategy_from_toml() {
        let config = Config::from_toml(
            "device_id = \"dev-9\"\nretry_strategy = \"linear\"\nretry_jitter = true\n",
        )
        .unwrap();
        assert_eq!(config.retry_strategy, RetryStrategy::Linear);
        assert!(config.retry_jitter);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config {
            password: "s3cret".to_string(),
            ..config_with_device("dev-1")
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config = Config::from_toml("device_id = \"dev-9\"\nbatch_size = 40\n").unwrap();
        assert_eq!(config.batch_size, 40);
        assert_eq!(config.exchange, "libs.monitoring");
        assert_eq!(config.min_log_level, LogLevel::Verbose);
    }

    #[test]
    fn test_diagnostic_level_conversion() {
        assert_eq!(tracing::Level::from(DiagnosticLevel::Warn), tracing::Level::WARN);
        assert_eq!(DiagnosticLevel::Trace.as_str(), "trace");
    }
}
