//! CLI entry point for detector-daq
//!
//! One subcommand per acquisition workflow, all running against the
//! simulated detector, plus offline correction:
//!
//! ```bash
//! detector-daq --config config/detector.toml software-trigger
//! detector-daq sequence
//! DETECTOR_ACQUISITION__STREAM_DURATION=2s detector-daq xfps
//! detector-daq correct
//! echo -e "on\nstream\ncapture\nquit" | detector-daq console
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod workflows;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Settings;
use detector_core::DetectorError;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "detector-daq")]
#[command(about = "Detector acquisition and image correction workflows", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Capture frames on external trigger pulses
    ExternalTrigger,
    /// Capture frames one software trigger at a time
    SoftwareTrigger,
    /// Capture one triggered burst into a multi-page TIFF
    Sequence,
    /// Free-running capture for the configured duration
    Xfps,
    /// Free-running capture delivered through a callback
    Callback,
    /// Offset, gain and defect correction of the source image
    Correct,
    /// Dark-correct, crop and invert a directory of exposures
    BatchDark,
    /// Interactive capture console reading commands from stdin
    Console,
}

impl Commands {
    fn name(self) -> &'static str {
        match self {
            Self::ExternalTrigger => "external-trigger",
            Self::SoftwareTrigger => "software-trigger",
            Self::Sequence => "sequence",
            Self::Xfps => "xfps",
            Self::Callback => "callback",
            Self::Correct => "correct",
            Self::BatchDark => "batch-dark",
            Self::Console => "console",
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings.log_level);

    let command = cli.command;
    info!(command = command.name(), "detector-daq starting");

    let result = match command {
        Commands::ExternalTrigger => workflows::external_trigger(&settings).await,
        Commands::SoftwareTrigger => workflows::software_trigger(&settings).await,
        Commands::Sequence => workflows::sequence(&settings).await,
        Commands::Xfps => workflows::xfps(&settings).await,
        Commands::Callback => workflows::callback(&settings).await,
        Commands::Correct => workflows::correct(&settings).await,
        Commands::BatchDark => workflows::batch_dark(&settings).await,
        Commands::Console => workflows::console(&settings).await,
    };

    if let Err(e) = &result {
        match e.downcast_ref::<DetectorError>() {
            Some(cause) => error!(
                command = command.name(),
                code = cause.code(),
                category = %cause.category(),
                "{:#}",
                e
            ),
            None => error!(command = command.name(), "{:#}", e),
        }
    }
    result
}
