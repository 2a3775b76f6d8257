//! Custom error types for the application.
//!
//! This module defines the primary error type, `HydrostatError`, for the
//! entire daemon. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure modes that matter here:
//!
//! - **`Config`**: semantic configuration problems, values that parse but are
//!   logically invalid (unknown log level, empty port name).
//! - **`Transport`**: serial write/read/timeout failures. Fatal to the poll
//!   loop; the pipeline shuts down rather than retrying.
//! - **`Decode`**: a malformed sensor response frame. Fails the single reading
//!   only; the sensor store is never updated from a bad frame.
//! - **`Persistence`** / **`StateNotFound`**: durable-store failures. NotFound
//!   is distinguished so callers can branch on first-run initialization
//!   instead of treating it as a fault.
//! - **`Pin`**: an actuator drive failure. Whether this is fatal is decided
//!   per timer instance via its pin policy.
//! - **`Script`**: the embedded script failed to compile or evaluate.
//!
//! By using `#[from]` where an underlying error maps one-to-one,
//! `HydrostatError` can be created seamlessly with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, HydrostatError>;

#[derive(Error, Debug)]
pub enum HydrostatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("No persisted state under key '{0}'")]
    StateNotFound(String),

    #[error("Pin error: {0}")]
    Pin(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Sensor data channel closed")]
    ChannelClosed,
}

impl HydrostatError {
    /// Whether this error is the distinguished "key absent" outcome of the
    /// durable store, used for first-run setup rather than failure handling.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StateNotFound(_))
    }
}
