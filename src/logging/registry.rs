use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use eyre::Context;
use log::{LevelFilter, Log};

use super::{
    channel::{Channel, Dispatch},
    error::ConfigError,
    ids::{IdGenerator, SequentialIdGenerator, SnowflakeIdGenerator},
    network::{NetworkSink, TcpConnector},
    queued::QueuedSink,
    record::{Record, RecordBuilder, Severity, SourceLocation},
    sinks::{ConsoleSink, FileSink},
    LogSink,
};
use crate::config::{PipelineConfig, SinkConfig};

/// Channel name to channel mapping. Built once, read-only afterwards.
pub struct Registry {
    channels: BTreeMap<String, Channel>,
    fallback: Option<String>,
    ids: Arc<dyn IdGenerator>,
    sinks: Vec<Arc<dyn LogSink>>,
    shut_down: AtomicBool,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Builds every channel, formatter and sink described by `config`.
    ///
    /// All collector outputs share one connection behind one delivery worker;
    /// file outputs with the same path share one handle.
    pub fn from_config(config: &PipelineConfig) -> Result<Registry, ConfigError> {
        let mut created: Vec<Arc<dyn LogSink>> = Vec::new();
        let result = Self::assemble(config, &mut created);
        if result.is_err() {
            for sink in &created {
                sink.close();
            }
        }
        result
    }

    fn assemble(
        config: &PipelineConfig,
        created: &mut Vec<Arc<dyn LogSink>>,
    ) -> Result<Registry, ConfigError> {
        let mut builder = Registry::builder().with_ids(Arc::new(SnowflakeIdGenerator::new(
            config.snowflake_instance(),
        )));

        let mut collector: Option<Arc<dyn LogSink>> = None;
        let mut console: Option<Arc<dyn LogSink>> = None;
        let mut files: HashMap<PathBuf, Arc<dyn LogSink>> = HashMap::new();

        for channel_config in config.enabled_channels()? {
            let mut channel = Channel::new(&channel_config.name, channel_config.level);

            for output in &channel_config.outputs {
                let sink = match &output.sink {
                    SinkConfig::File { path } => {
                        let path = config.log_dir.join(path);
                        match files.get(&path) {
                            Some(sink) => Arc::clone(sink),
                            None => {
                                let sink: Arc<dyn LogSink> =
                                    Arc::new(FileSink::new(&path).map_err(|source| {
                                        ConfigError::Sink {
                                            path: path.display().to_string(),
                                            source,
                                        }
                                    })?);
                                created.push(Arc::clone(&sink));
                                files.insert(path, Arc::clone(&sink));
                                sink
                            }
                        }
                    }
                    SinkConfig::Collector => match &collector {
                        Some(sink) => Arc::clone(sink),
                        None => {
                            let sink = Self::collector_sink(config)?;
                            created.push(Arc::clone(&sink));
                            collector = Some(Arc::clone(&sink));
                            sink
                        }
                    },
                    SinkConfig::Console => Arc::clone(
                        console.get_or_insert_with(|| Arc::new(ConsoleSink::new()) as Arc<dyn LogSink>),
                    ),
                };

                channel = channel.with_output(output.format.build(&config.machine_id), sink);
            }

            builder = builder.with_channel(channel);
        }

        builder.build()
    }

    fn collector_sink(config: &PipelineConfig) -> Result<Arc<dyn LogSink>, ConfigError> {
        let collector = &config.collector;
        let connector = TcpConnector::new(&collector.host, collector.port)?
            .with_connect_timeout(collector.connect_timeout)
            .with_write_timeout(Some(collector.write_timeout));
        let network = NetworkSink::new(connector, collector.retry_delay);

        let queued = QueuedSink::spawn(
            "logship-collector",
            Arc::new(network),
            collector.queue_capacity,
            collector.drain_timeout,
        )
        .map_err(|source| ConfigError::Sink {
            path: format!("{}:{}", collector.host, collector.port),
            source,
        })?;

        Ok(Arc::new(queued))
    }

    pub fn get(&self, name: &str) -> Result<&Channel, ConfigError> {
        self.channels
            .get(name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    /// Builds the record with this registry's id generator and routes it to `channel`.
    pub fn log(&self, channel: &str, record: RecordBuilder) -> Result<Dispatch, ConfigError> {
        let channel = self.get(channel)?;
        Ok(channel.log(&record.build(self.ids())))
    }

    /// Most verbose `log` filter any channel can use.
    pub fn max_level_filter(&self) -> LevelFilter {
        self.channels
            .values()
            .map(|c| c.min_severity().level_filter())
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Flushes and closes every sink once. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for sink in &self.sinks {
            sink.flush();
            sink.close();
        }
        tracing::debug!(sinks = self.sinks.len(), "log registry shut down");
    }

    /// Routes the `log` crate macros through this registry; the record target
    /// selects the channel.
    pub fn install(registry: Arc<Registry>) -> eyre::Result<()> {
        let level = registry.max_level_filter();
        log::set_boxed_logger(Box::new(LogBridge::new(registry)))
            .context("Failed registering boxed logger")?;
        log::set_max_level(level);

        Ok(())
    }

    fn channel_for_target(&self, target: &str) -> Option<&Channel> {
        self.channels.get(target).or_else(|| {
            self.fallback
                .as_ref()
                .and_then(|name| self.channels.get(name))
        })
    }
}

pub struct RegistryBuilder {
    ids: Arc<dyn IdGenerator>,
    channels: Vec<Channel>,
    fallback: Option<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            ids: Arc::new(SequentialIdGenerator::default()),
            channels: Vec::new(),
            fallback: None,
        }
    }

    pub fn with_ids(self, ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids, ..self }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Channel for `log` records whose target names no channel.
    pub fn with_fallback(self, name: impl Into<String>) -> Self {
        Self {
            fallback: Some(name.into()),
            ..self
        }
    }

    pub fn build(self) -> Result<Registry, ConfigError> {
        let mut channels = BTreeMap::new();
        let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();

        for channel in self.channels {
            for binding in channel.bindings() {
                let seen = sinks
                    .iter()
                    .any(|s| Arc::as_ptr(s).cast::<()>() == Arc::as_ptr(&binding.sink).cast::<()>());
                if !seen {
                    sinks.push(Arc::clone(&binding.sink));
                }
            }

            let name = channel.name().to_string();
            if channels.insert(name.clone(), channel).is_some() {
                return Err(ConfigError::DuplicateChannel(name));
            }
        }

        if let Some(fallback) = &self.fallback {
            if !channels.contains_key(fallback) {
                return Err(ConfigError::UnknownChannel(fallback.clone()));
            }
        }

        Ok(Registry {
            channels,
            fallback: self.fallback,
            ids: self.ids,
            sinks,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `log::Log` adapter over a shared [`Registry`].
pub struct LogBridge {
    registry: Arc<Registry>,
}

impl LogBridge {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        !self.registry.is_shut_down()
            && self
                .registry
                .channel_for_target(metadata.target())
                .is_some_and(|c| c.accepts(metadata.level().into()))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(channel) = self.registry.channel_for_target(record.target()) else {
            return;
        };

        let source = SourceLocation::new(
            record.file().unwrap_or_default(),
            record.line().unwrap_or_default(),
            record.module_path().unwrap_or_default(),
        );
        let event = Record::builder(Severity::from(record.level()), record.args().to_string())
            .source(source)
            .build(self.registry.ids());

        channel.log(&event);
    }

    fn flush(&self) {
        for sink in &self.registry.sinks {
            sink.flush();
        }
    }
}
