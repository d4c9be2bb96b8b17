//! ## brikke-cli
//! **Operational interface for the identity subsystem**
//!
//! Drives a fully wired allocator through a soak workload and decodes
//! checkpoint files for inspection.
//!
//! ### Expectations:
//! - POSIX-compliant argument parsing
//! - Audit logging for all commands

use clap::Parser;
use brikke_telemetry::logging::EventLogger;
use brikke_telemetry::metrics::MetricsRecorder;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    EventLogger::init();
    let metrics = MetricsRecorder::new();
    let cli = Cli::parse();

    match cli.command {
        Commands::Soak(soak_args) => commands::run_soak_mode(soak_args, metrics).await,
        Commands::Inspect(inspect_args) => commands::run_inspect_mode(inspect_args),
    }
}
