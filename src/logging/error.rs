use std::io;

use thiserror::Error;

/// Why a sink refused or failed to hand off a payload.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink is closed")]
    Closed,

    #[error("delivery queue is full, payload dropped")]
    QueueFull,

    /// The connection was re-established but resending the payload failed again.
    #[error("resend after reconnect failed: {0}")]
    Transport(#[source] io::Error),

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

impl DeliveryError {
    pub fn is_closed(&self) -> bool {
        matches!(self, DeliveryError::Closed)
    }
}

/// Startup-time failures. A process must not begin work with any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("channel '{0}' is not registered")]
    UnknownChannel(String),

    #[error("channel '{0}' is registered more than once")]
    DuplicateChannel(String),

    #[error("invalid collector endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("unknown severity '{0}'")]
    InvalidSeverity(String),

    #[error("unknown format '{0}'")]
    UnknownFormat(String),

    #[error("failed to open sink {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: io::Error,
    },
}
