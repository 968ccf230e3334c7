use std::{fmt::Display, path::PathBuf};

use clap::{Parser, Subcommand};
use eyre::Context;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{ConfigManager, LocalConfigManager};

mod emit;
mod info;
mod listen;

#[derive(Subcommand, Debug)]
pub enum LogshipCmd {
    Emit(emit::Cmd),

    Listen(listen::Cmd),

    Info(info::Cmd),
}

impl Display for LogshipCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogshipCmd::Emit(_cmd) => write!(f, "emit"),
            LogshipCmd::Listen(cmd) => write!(f, "listen {}", cmd.bind),
            LogshipCmd::Info(_cmd) => write!(f, "info"),
        }
    }
}

#[derive(Parser)]
#[command(version, long_version = "")]
#[command(about = "Ship structured application logs to files and a remote collector.", long_about = None, disable_help_subcommand = true)]
pub struct Logship {
    #[arg(
        global = true,
        long,
        short = 'c',
        help = "Path to a JSON pipeline config. LOGSHIP_* environment variables override it.",
        display_order = 0
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = "Write more diagnostics to stderr. Repeat for more detail.",
        display_order = 999
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: LogshipCmd,
}

impl Logship {
    fn diagnostics_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            3_u8..=u8::MAX => LevelFilter::TRACE,
        }
    }

    // `finish()` + `set_global_default` rather than `init()`, which would also
    // claim the `log` facade that the pipeline installs itself on.
    fn setup_diagnostics(&self) -> eyre::Result<()> {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.diagnostics_filter())
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .context("Failed installing diagnostics subscriber")
    }

    pub fn run(self) -> eyre::Result<()> {
        self.setup_diagnostics()?;
        let config = LocalConfigManager::new(self.config.clone());

        tracing::debug!("running command {}", &self.cmd);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let result = runtime.block_on(self.invoke_sub_command(config));

        if let Err(msg) = &result {
            tracing::error!("failed running command {}, error={} cause={}", &self.cmd, msg, msg.root_cause());
        }

        result
    }

    async fn invoke_sub_command<T>(&self, config: T) -> eyre::Result<()>
    where
        T: ConfigManager,
    {
        match &self.cmd {
            LogshipCmd::Emit(emit) => emit.run(&config).await,
            LogshipCmd::Listen(listen) => listen.run().await,
            LogshipCmd::Info(info) => info.run(&config).await,
        }
    }
}
