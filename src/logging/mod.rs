mod channel;
mod error;
mod formatters;
mod ids;
mod network;
mod queued;
mod record;
mod registry;
mod sinks;

pub use channel::{Binding, Channel, Dispatch};
pub use error::{ConfigError, DeliveryError};
pub use formatters::{
    iso_timestamp, ApplicationFormatter, ErrorFormatter, FormatKind, JsonFormatter, LineFormatter,
};
pub use ids::{IdGenerator, SequentialIdGenerator, SnowflakeIdGenerator, SNOWFLAKE_EPOCH_MS};
pub use network::{ConnectionState, Connector, NetworkSink, TcpConnector, DEFAULT_RETRY_DELAY};
pub use queued::{QueuedSink, DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use record::{ExceptionInfo, Record, RecordBuilder, Severity, SourceLocation};
pub use registry::{LogBridge, Registry, RegistryBuilder};
pub use sinks::{ConsoleSink, FileSink, MemorySink};

/// Turns a record into a wire-ready payload. Implementations must be pure.
pub trait LogFormatter: Sync + Send {
    fn format(&self, record: &Record) -> String;
}

/// Destination for formatted payloads. Each payload is written followed by a
/// single newline.
pub trait LogSink: Sync + Send {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError>;

    fn flush(&self) {}

    /// Releases held resources. Idempotent; later `deliver` calls fail with
    /// [`DeliveryError::Closed`].
    fn close(&self);

    fn describe(&self) -> String;
}
