use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{
    record::{ExceptionInfo, Record},
    LogFormatter,
};

/// ISO-8601 with an explicit `+00:00` offset. Microseconds are printed only
/// when non-zero.
pub fn iso_timestamp(time: &DateTime<Utc>) -> String {
    let precision = if time.timestamp_subsec_micros() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    time.to_rfc3339_opts(precision, false)
}

/// `<id>::<timestamp>::<message>`
#[derive(Clone, Debug, Default)]
pub struct LineFormatter;

impl LogFormatter for LineFormatter {
    fn format(&self, record: &Record) -> String {
        format!(
            "{}::{}::{}",
            record.id(),
            iso_timestamp(record.timestamp()),
            record.message()
        )
    }
}

/// `<id>::<timestamp>::<machine-id>::<severity>::<message>`
#[derive(Clone, Debug)]
pub struct ApplicationFormatter {
    machine_id: String,
}

impl ApplicationFormatter {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
        }
    }
}

impl LogFormatter for ApplicationFormatter {
    fn format(&self, record: &Record) -> String {
        format!(
            "{}::{}::{}::{}::{}",
            record.id(),
            iso_timestamp(record.timestamp()),
            self.machine_id,
            record.severity(),
            record.message()
        )
    }
}

/// Multi-line block with a header and a fixed set of labeled exception fields.
/// Fields of an absent exception render empty. The block ends with its own
/// newline, so blocks in a line-oriented sink are separated by a blank line.
#[derive(Clone, Debug)]
pub struct ErrorFormatter {
    machine_id: String,
}

impl ErrorFormatter {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
        }
    }
}

impl LogFormatter for ErrorFormatter {
    fn format(&self, record: &Record) -> String {
        let (exc_type, exc_message, stack_trace) = match record.exception() {
            Some(e) => (
                e.type_name.as_str(),
                e.message.as_str(),
                e.stack_trace.as_str(),
            ),
            None => ("", "", ""),
        };
        let source = record.source();

        format!(
            "{}::{}::{}::{}\n\
             *****\n\
             Exception Type: {}\n\
             Message: {}\n\
             Location: {}:{} {}\n\
             Traceback: {}\n\
             ______\n",
            record.id(),
            iso_timestamp(record.timestamp()),
            self.machine_id,
            record.severity(),
            exc_type,
            exc_message,
            source.file_name(),
            source.line,
            source.function,
            stack_trace,
        )
    }
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    snowflake_id: u64,
    #[serde(rename = "@timestamp")]
    timestamp: String,
    machine_id: &'a str,
    level: &'static str,
    message: &'a str,
    filename: &'a str,
    lineno: u32,
    #[serde(rename = "funcName")]
    func_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a ExceptionInfo>,
}

/// One flat JSON object per record, the shape collectors ingest.
#[derive(Clone, Debug)]
pub struct JsonFormatter {
    machine_id: String,
}

impl JsonFormatter {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
        }
    }
}

impl LogFormatter for JsonFormatter {
    fn format(&self, record: &Record) -> String {
        let source = record.source();
        let entry = JsonEntry {
            snowflake_id: record.id(),
            timestamp: iso_timestamp(record.timestamp()),
            machine_id: &self.machine_id,
            level: record.severity().as_str(),
            message: record.message(),
            filename: source.file_name(),
            lineno: source.line,
            func_name: &source.function,
            exception: record.exception(),
        };

        match serde_json::to_string(&entry) {
            Ok(json) => json,
            // Unreachable for the types above, but a formatter must not fail.
            Err(err) => serde_json::json!({
                "snowflake_id": record.id(),
                "level": record.severity().as_str(),
                "message": format!("unserializable record: {err}"),
            })
            .to_string(),
        }
    }
}

/// Formatter selection as written in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Line,
    Application,
    Error,
    Json,
}

impl FormatKind {
    pub fn build(&self, machine_id: &str) -> Arc<dyn LogFormatter> {
        match self {
            FormatKind::Line => Arc::new(LineFormatter),
            FormatKind::Application => Arc::new(ApplicationFormatter::new(machine_id)),
            FormatKind::Error => Arc::new(ErrorFormatter::new(machine_id)),
            FormatKind::Json => Arc::new(JsonFormatter::new(machine_id)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Line => "line",
            FormatKind::Application => "application",
            FormatKind::Error => "error",
            FormatKind::Json => "json",
        }
    }
}
