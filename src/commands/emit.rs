use std::{sync::Arc, time::Duration};

use clap::Args;
use eyre::Context;

use crate::{
    config::{ConfigManager, ACTIVITY_CHANNEL, APPLICATION_CHANNEL, ERROR_CHANNEL},
    logging::{ExceptionInfo, Record, Registry, Severity},
    source_location,
};

#[derive(Debug, thiserror::Error)]
#[error("Simulated error for demonstration.")]
struct SimulatedError;

fn background_work() -> Result<(), SimulatedError> {
    Err(SimulatedError)
}

#[derive(Args, Debug)]
pub struct Cmd {
    #[arg(
        short,
        long,
        value_parser = humantime::parse_duration,
        default_value = "5s",
        help = "Pause between emitted batches, in human-friendly format."
    )]
    pub interval: Duration,

    #[arg(short = 'n', long, help = "Stop after this many batches. Runs until Ctrl-C by default.")]
    pub count: Option<u64>,
}

impl Cmd {
    pub async fn run(&self, config: &impl ConfigManager) -> eyre::Result<()> {
        let config = config.load()?;

        for path in config.file_paths()? {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed creating log directory {}", parent.display())
                })?;
            }
        }

        let registry =
            Arc::new(Registry::from_config(&config).wrap_err("Invalid logging configuration")?);
        Registry::install(Arc::clone(&registry))?;
        tracing::info!(
            collector = %format!("{}:{}", config.collector.host, config.collector.port),
            "emitting every {}",
            humantime::format_duration(self.interval)
        );

        let result = self.emit_until_stopped(&registry).await;
        registry.shutdown();

        result
    }

    async fn emit_until_stopped(&self, registry: &Registry) -> eyre::Result<()> {
        let mut batches: u64 = 0;

        loop {
            self.emit_batch(registry);
            batches += 1;

            if self.count.is_some_and(|count| batches >= count) {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed listening for Ctrl-C")?;
                    tracing::info!(batches, "interrupted, shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn emit_batch(&self, registry: &Registry) {
        log::info!(
            target: ACTIVITY_CHANNEL,
            "Logging activity every {}",
            humantime::format_duration(self.interval)
        );
        log::info!(target: APPLICATION_CHANNEL, "Background task running...");
        log::info!(target: APPLICATION_CHANNEL, "Root endpoint accessed");

        if let Err(err) = background_work() {
            // The error channel may be disabled through LOGSHIP_CHANNELS.
            if let Ok(channel) = registry.get(ERROR_CHANNEL) {
                let record =
                    Record::builder(Severity::Error, "An error occurred in the background task")
                        .source(source_location!())
                        .exception(ExceptionInfo::capture(&err))
                        .build(registry.ids());
                channel.log(&record);
            }
        }
    }
}
