#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Durations and sizes stay within realistic bounds
    clippy::cast_possible_wrap,       // Gauges are fed non-negative values
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::cast_sign_loss,           // Values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. ConnectionError in connection module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod buffer;
pub mod consumer;
pub mod domain;
pub mod logger;
pub mod network;
pub mod pipeline;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use app::{App, Config};
pub use domain::{LogLevel, LogRecord, RoutingKey, ValidationError};
pub use logger::Logger;
pub use pipeline::{Pipeline, PipelineConfig, ShutdownPolicy, ShutdownReport};
pub use sender::{AmqpGateway, AmqpSettings, MessagingGateway};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
