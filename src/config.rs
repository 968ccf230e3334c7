use std::{path::PathBuf, time::Duration};

use eyre::Context;
use serde::{Deserialize, Serialize};

use crate::logging::{
    ConfigError, FormatKind, Severity, DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RETRY_DELAY,
};

pub const ENV_COLLECTOR_HOST: &str = "LOGSHIP_COLLECTOR_HOST";
pub const ENV_COLLECTOR_PORT: &str = "LOGSHIP_COLLECTOR_PORT";
pub const ENV_MACHINE_ID: &str = "LOGSHIP_MACHINE_ID";
pub const ENV_LOG_DIR: &str = "LOGSHIP_LOG_DIR";
pub const ENV_CHANNELS: &str = "LOGSHIP_CHANNELS";

pub const ACTIVITY_CHANNEL: &str = "activity_logger";
pub const ERROR_CHANNEL: &str = "error_logger";
pub const APPLICATION_CHANNEL: &str = "application_logger";

pub trait ConfigManager: Sized + Clone + Send + Sync {
    fn load(&self) -> eyre::Result<PipelineConfig>;
}

/// Reads an optional JSON file, then applies `LOGSHIP_*` environment overrides.
#[derive(Default, Clone, Debug)]
pub struct LocalConfigManager {
    path: Option<PathBuf>,
}

impl LocalConfigManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigManager for LocalConfigManager {
    fn load(&self) -> eyre::Result<PipelineConfig> {
        let mut config = match &self.path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed reading config file {}", path.display()))?;
                PipelineConfig::from_json(&contents)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    #[serde(with = "duration_str")]
    pub drain_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Relative paths are resolved against `log_dir`.
    File { path: PathBuf },
    Collector,
    Console,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: FormatKind,
    pub sink: SinkConfig,
}

impl OutputConfig {
    pub fn new(format: FormatKind, sink: SinkConfig) -> Self {
        Self { format, sink }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(with = "severity_str")]
    pub level: Severity,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub machine_id: String,
    pub node_id: u16,
    pub service_id: u16,
    pub log_dir: PathBuf,
    pub collector: CollectorConfig,
    pub channels: Vec<ChannelConfig>,
    /// `None` enables every channel.
    pub enabled: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let file = |path: &str| SinkConfig::File {
            path: PathBuf::from(path),
        };

        Self {
            machine_id: "YOUR_MACHINE_ID_HERE".to_string(),
            node_id: 1,
            service_id: 50,
            log_dir: PathBuf::from("logs"),
            collector: CollectorConfig::default(),
            channels: vec![
                ChannelConfig {
                    name: ACTIVITY_CHANNEL.to_string(),
                    level: Severity::Debug,
                    outputs: vec![
                        OutputConfig::new(FormatKind::Line, file("activity_log/activity.log")),
                        OutputConfig::new(FormatKind::Json, SinkConfig::Collector),
                    ],
                },
                ChannelConfig {
                    name: ERROR_CHANNEL.to_string(),
                    level: Severity::Warning,
                    outputs: vec![
                        OutputConfig::new(FormatKind::Error, file("error_log/errors.log")),
                        OutputConfig::new(FormatKind::Json, SinkConfig::Collector),
                    ],
                },
                ChannelConfig {
                    name: APPLICATION_CHANNEL.to_string(),
                    level: Severity::Info,
                    outputs: vec![
                        OutputConfig::new(
                            FormatKind::Application,
                            file("application_log/application.log"),
                        ),
                        OutputConfig::new(FormatKind::Json, SinkConfig::Collector),
                    ],
                },
            ],
            enabled: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(contents: &str) -> eyre::Result<Self> {
        serde_json::from_str(contents).context("Failed parsing pipeline config")
    }

    /// Applies `LOGSHIP_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> eyre::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_COLLECTOR_HOST) {
            self.collector.host = host;
        }
        if let Some(port) = lookup(ENV_COLLECTOR_PORT) {
            self.collector.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_COLLECTOR_PORT} is not a valid port: {port}"))?;
        }
        if let Some(machine_id) = lookup(ENV_MACHINE_ID) {
            self.machine_id = machine_id;
        }
        if let Some(log_dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(log_dir);
        }
        if let Some(channels) = lookup(ENV_CHANNELS) {
            self.enabled = Some(
                channels
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        Ok(())
    }

    /// Instance bits for the snowflake generator.
    pub fn snowflake_instance(&self) -> u16 {
        self.node_id.wrapping_add(self.service_id)
    }

    /// Channels to build, in declaration order. Naming a channel that does not
    /// exist in `enabled` is a configuration error.
    pub fn enabled_channels(&self) -> Result<Vec<&ChannelConfig>, ConfigError> {
        let Some(enabled) = &self.enabled else {
            return Ok(self.channels.iter().collect());
        };

        if let Some(unknown) = enabled
            .iter()
            .find(|name| !self.channels.iter().any(|c| &c.name == *name))
        {
            return Err(ConfigError::UnknownChannel(unknown.clone()));
        }

        Ok(self
            .channels
            .iter()
            .filter(|c| enabled.contains(&c.name))
            .collect())
    }

    /// Resolved paths of every file output of the enabled channels.
    pub fn file_paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut paths = Vec::new();
        for channel in self.enabled_channels()? {
            for output in &channel.outputs {
                if let SinkConfig::File { path } = &output.sink {
                    let path = self.log_dir.join(path);
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
        }
        Ok(paths)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

mod severity_str {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::logging::Severity;

    pub fn serialize<S: Serializer>(value: &Severity, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Severity, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
