//! FlowTest CLI - authenticated access to the FlowTest backend

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::time::Duration;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(name = "flowtest")]
#[command(about = "Command-line client for the FlowTest test-management backend")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Data directory for the session file, configuration and logs
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Configuration file (defaults to DATA_DIR/flowtest.toml when present)
    #[arg(short = 'c', long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Timeout for one-shot commands in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "30")]
    timeout: u64,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = config::resolve_data_dir(cli.data_dir);
    logging::init_logging(cli.log_level.into(), &data_dir, cli.no_file_log)?;

    info!("Starting FlowTest CLI");

    let long_running = matches!(cli.command, Commands::Watch);
    let run = cli.command.execute(data_dir, cli.config);

    // Watch mode runs until interrupted, so it is never wrapped in the timeout
    let outcome = if cli.timeout == 0 || long_running {
        Ok(run.await)
    } else {
        tokio::time::timeout(Duration::from_secs(cli.timeout), run).await
    };

    match outcome {
        Ok(Ok(())) => {
            info!("Command completed successfully");
        }
        Ok(Err(e)) => {
            error!("Command failed: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
        Err(_) => {
            error!("Command timed out after {} seconds", cli.timeout);
            eprintln!("error: timed out after {} seconds", cli.timeout);
            std::process::exit(1);
        }
    }

    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
