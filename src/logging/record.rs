use std::{
    backtrace::Backtrace,
    error::Error,
    fmt::{self, Display},
    path::Path,
    str::FromStr,
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{error::ConfigError, ids::IdGenerator};

/// Ordered log level, least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Most verbose `log` filter that still lets this severity through.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self {
            Severity::Debug => log::LevelFilter::Trace,
            Severity::Info => log::LevelFilter::Info,
            Severity::Warning => log::LevelFilter::Warn,
            Severity::Error | Severity::Critical => log::LevelFilter::Error,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" | "FATAL" => Ok(Severity::Critical),
            _ => Err(ConfigError::InvalidSeverity(s.to_string())),
        }
    }
}

impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warning,
            log::Level::Info => Severity::Info,
            log::Level::Debug | log::Level::Trace => Severity::Debug,
        }
    }
}

/// Where a log call originated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    /// Base name of `file`, or the whole value if it has none.
    pub fn file_name(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.file)
    }
}

/// Captures the [`SourceLocation`] of the call site. Rust has no function name
/// macro, so the module path stands in for it.
#[macro_export]
macro_rules! source_location {
    () => {
        $crate::logging::SourceLocation::new(file!(), line!(), module_path!())
    };
}

/// An error captured alongside a record. All three fields are always present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    pub stack_trace: String,
}

impl ExceptionInfo {
    pub fn new(
        type_name: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: stack_trace.into(),
        }
    }

    /// Captures `err` together with its source chain and the current backtrace.
    pub fn capture<E>(err: &E) -> Self
    where
        E: Error + 'static,
    {
        let mut stack_trace = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack_trace.push_str(&format!("Caused by: {cause}\n"));
            source = cause.source();
        }
        stack_trace.push_str(&Backtrace::force_capture().to_string());

        Self {
            type_name: short_type_name(std::any::type_name::<E>()).to_string(),
            message: err.to_string(),
            stack_trace,
        }
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// One immutable log event. Construct through [`Record::builder`].
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    id: u64,
    severity: Severity,
    message: String,
    timestamp: DateTime<Utc>,
    source: SourceLocation,
    exception: Option<ExceptionInfo>,
}

impl Record {
    pub fn builder(severity: Severity, message: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            severity,
            message: message.into(),
            source: SourceLocation::default(),
            exception: None,
            timestamp: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }
}

pub struct RecordBuilder {
    severity: Severity,
    message: String,
    source: SourceLocation,
    exception: Option<ExceptionInfo>,
    timestamp: Option<DateTime<Utc>>,
}

impl RecordBuilder {
    pub fn source(self, source: SourceLocation) -> Self {
        Self { source, ..self }
    }

    pub fn exception(self, exception: ExceptionInfo) -> Self {
        Self {
            exception: Some(exception),
            ..self
        }
    }

    /// Overrides the capture time, for events that happened before the record is built.
    pub fn timestamp(self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self
        }
    }

    /// Finalizes the record. The timestamp is taken here, once.
    pub fn build(self, ids: &dyn IdGenerator) -> Record {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6);

        Record {
            id: ids.next_id(),
            severity: self.severity,
            message: self.message,
            timestamp,
            source: self.source,
            exception: self.exception,
        }
    }
}
