//! Domain layer for rask-log-shipper.
//!
//! Contains the canonical types shared across all modules:
//! - `LogRecord`: a single device log event and its wire line
//! - `LogLevel`: device log severity (Verbose/Debug/Info/Warn/Error/Assert)
//! - `RoutingKey`: the broker routing key derived from the device identity
//! - `ValidationError`: rejections at the ingestion boundary

pub mod error;
pub mod log_level;
pub mod log_record;
pub mod routing;

pub use error::ValidationError;
pub use log_level::LogLevel;
pub use log_record::LogRecord;
pub use routing::RoutingKey;
