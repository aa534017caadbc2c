//! Error types for the connection pool and reconnection manager

use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::settings::ConfigError;

#[derive(Error, Debug)]
pub enum PoolError {
    /// Every connection was in use for the whole acquisition window.
    #[error("Connection pool exhausted - no connection available after {0:?}")]
    Exhausted(Duration),

    #[error("Connection pool is closed")]
    Closed,

    #[error("Failed to create connection: {0}")]
    Creation(#[source] ConnectionError),

    #[error("Connection failed during use: {0}")]
    Connection(#[source] ConnectionError),

    /// The reconnect gate refused an attempt; no I/O was performed.
    #[error("Database unavailable - next reconnect attempt allowed in {retry_in:?}")]
    Unavailable { retry_in: Duration },

    #[error("Database configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics export failed: {0}")]
    Metrics(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    /// Whether the manager's retry loop may try again after this error.
    ///
    /// Exhaustion is backpressure and a closed pool is a programming error,
    /// so neither is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::Creation(_)
                | PoolError::Connection(_)
                | PoolError::Unavailable { .. }
                | PoolError::Config(_)
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
