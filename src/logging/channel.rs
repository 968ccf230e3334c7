use std::sync::Arc;

use super::{
    error::DeliveryError,
    record::{Record, Severity},
    LogFormatter, LogSink,
};

/// A formatter paired with the sink that receives its output.
#[derive(Clone)]
pub struct Binding {
    pub formatter: Arc<dyn LogFormatter>,
    pub sink: Arc<dyn LogSink>,
}

/// Result of routing one record through a channel.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub delivered: usize,
    pub failures: Vec<DeliveryError>,
}

impl Dispatch {
    pub fn is_dropped(&self) -> bool {
        self.delivered == 0 && self.failures.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Named stream with a severity threshold and an ordered list of outputs.
#[derive(Clone)]
pub struct Channel {
    name: String,
    min_severity: Severity,
    bindings: Vec<Binding>,
}

impl Channel {
    pub fn new(name: impl Into<String>, min_severity: Severity) -> Self {
        Self {
            name: name.into(),
            min_severity,
            bindings: Vec::new(),
        }
    }

    pub fn with_output(mut self, formatter: Arc<dyn LogFormatter>, sink: Arc<dyn LogSink>) -> Self {
        self.bindings.push(Binding { formatter, sink });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn accepts(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Formats and delivers `record` to every output. Records below the
    /// threshold are dropped before formatting. One failing sink does not
    /// keep the others from receiving the record.
    pub fn log(&self, record: &Record) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if !self.accepts(record.severity()) {
            return dispatch;
        }

        for binding in &self.bindings {
            let payload = binding.formatter.format(record);
            match binding.sink.deliver(&payload) {
                Ok(()) => dispatch.delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        channel = %self.name,
                        sink = %binding.sink.describe(),
                        record = record.id(),
                        "log delivery failed: {err}"
                    );
                    dispatch.failures.push(err);
                }
            }
        }

        dispatch
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::logging::{
        formatters::{ErrorFormatter, LineFormatter},
        ids::SequentialIdGenerator,
        sinks::MemorySink,
    };

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn deliver(&self, _payload: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        }

        fn close(&self) {}

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn below_threshold_never_reaches_a_sink(
            threshold in severity(),
            level in severity(),
            message in ".*",
        ) {
            let sink = Arc::new(MemorySink::new());
            let channel = Channel::new("activity_logger", threshold)
                .with_output(Arc::new(LineFormatter), sink.clone());
            let record = Record::builder(level, message).build(&SequentialIdGenerator::default());

            let dispatch = channel.log(&record);

            if level < threshold {
                prop_assert!(dispatch.is_dropped());
                prop_assert!(sink.payloads().is_empty());
            } else {
                prop_assert_eq!(dispatch.delivered, 1);
                prop_assert_eq!(sink.payloads().len(), 1);
            }
        }
    }

    #[test]
    fn failing_sink_does_not_block_the_others() {
        let healthy = Arc::new(MemorySink::new());
        let channel = Channel::new("error_logger", Severity::Warning)
            .with_output(Arc::new(LineFormatter), Arc::new(BrokenSink))
            .with_output(Arc::new(LineFormatter), healthy.clone());
        let record = Record::builder(Severity::Error, "disk full")
            .build(&SequentialIdGenerator::new(5));

        let dispatch = channel.log(&record);

        assert_eq!(dispatch.delivered, 1);
        assert_eq!(dispatch.failures.len(), 1);
        assert!(!dispatch.is_complete());
        assert_eq!(healthy.payloads().len(), 1);
        assert!(healthy.payloads()[0].ends_with("::disk full"));
    }

    #[test]
    fn outputs_receive_their_own_format_in_order() {
        let lines = Arc::new(MemorySink::new());
        let blocks = Arc::new(MemorySink::new());
        let channel = Channel::new("error_logger", Severity::Warning)
            .with_output(Arc::new(LineFormatter), lines.clone())
            .with_output(Arc::new(ErrorFormatter::new("m-1")), blocks.clone());
        let ids = SequentialIdGenerator::new(1);

        channel.log(&Record::builder(Severity::Warning, "first").build(&ids));
        channel.log(&Record::builder(Severity::Critical, "second").build(&ids));

        let lines = lines.payloads();
        assert!(lines[0].starts_with("1::") && lines[0].ends_with("::first"));
        assert!(lines[1].starts_with("2::") && lines[1].ends_with("::second"));
        assert!(blocks.payloads()[1].contains("::m-1::CRITICAL\n*****\n"));
    }
}
