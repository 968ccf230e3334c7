use clap::{Args, CommandFactory};

use crate::{
    commands::Logship,
    config::{ConfigManager, PipelineConfig, SinkConfig},
    logging::{ConfigError, TcpConnector},
};

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {}

impl Cmd {
    pub async fn run(&self, config: &impl ConfigManager) -> eyre::Result<()> {
        let config = config.load()?;
        validate(&config)?;

        println!(
            "Version:        {}",
            Logship::command().get_version().unwrap_or("")
        );
        println!("Machine:        {}", config.machine_id);
        println!(
            "Collector:      {}:{}",
            config.collector.host, config.collector.port
        );
        println!("Log directory:  {}", config.log_dir.display());

        for channel in config.enabled_channels()? {
            println!();
            println!("{} (>= {})", channel.name, channel.level);
            for output in &channel.outputs {
                let target = match &output.sink {
                    SinkConfig::File { path } => config.log_dir.join(path).display().to_string(),
                    SinkConfig::Collector => "collector".to_string(),
                    SinkConfig::Console => "console".to_string(),
                };
                println!("  {:<12} -> {}", output.format.as_str(), target);
            }
        }

        Ok(())
    }
}

/// Checks everything that can be checked without opening files or sockets.
fn validate(config: &PipelineConfig) -> Result<(), ConfigError> {
    let channels = config.enabled_channels()?;

    let mut names: Vec<&str> = Vec::new();
    for channel in &channels {
        if names.contains(&channel.name.as_str()) {
            return Err(ConfigError::DuplicateChannel(channel.name.clone()));
        }
        names.push(&channel.name);
    }

    let uses_collector = channels
        .iter()
        .flat_map(|c| &c.outputs)
        .any(|o| o.sink == SinkConfig::Collector);
    if uses_collector {
        TcpConnector::new(&config.collector.host, config.collector.port)?;
    }

    Ok(())
}
