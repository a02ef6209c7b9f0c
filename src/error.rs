//! Error types for carbon-decider

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Upstream API answered with a non-success status
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Response body could not be interpreted
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Not enough distinct hourly buckets to fit the trend spline
    #[error("Insufficient data: {distinct_hours} distinct hour(s) in history, need at least {required}")]
    InsufficientData {
        distinct_hours: usize,
        required: usize,
    },

    /// Caller passed inputs the computation cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Spline fit could not be solved for the given points
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Filesystem error while reading config or writing the plot
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
