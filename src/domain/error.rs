use thiserror::Error;

/// Input rejected at the ingestion boundary. Nothing that fails validation is
/// ever placed in the log buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported log level: '{0}'")]
    UnsupportedLevel(String),

    #[error("Device ID cannot be empty")]
    EmptyDeviceId,

    #[error("Device ID '{0}' contains characters not allowed in a routing key")]
    InvalidDeviceId(String),
}
