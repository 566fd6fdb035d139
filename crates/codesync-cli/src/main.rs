//! `codesync`: drive simulated clients against an in-memory room store.
//!
//! ```bash
//! codesync simulate --clients 4 --edits 50 --typing-interval-ms 90
//! codesync config > sync.ron
//! codesync config --check sync.ron
//! ```

mod simulate;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codesync_client::SyncConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::simulate::SimulateArgs;

#[derive(Debug, Parser)]
#[command(name = "codesync", version, about = "Simulate collaborative editing of a CodeSync room")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run simulated clients editing one room and report convergence
    Simulate(SimulateArgs),
    /// Print the default sync configuration as RON, or validate a file
    Config {
        /// RON file to validate instead of printing defaults
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    let _otel_guard = if codesync_telemetry::otel_enabled() {
        match codesync_telemetry::otel_layer("codesync") {
            Ok((otel_layer, guard)) => {
                registry.with(otel_layer).init();
                Some(guard)
            }
            Err(e) => {
                registry.init();
                tracing::warn!("OTel export disabled: {e}");
                None
            }
        }
    } else {
        registry.init();
        None
    };
    #[cfg(not(feature = "telemetry"))]
    registry.init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(args) => {
            let report = simulate::run(&args).await?;
            println!("{report}");
            if args.strict && !report.converged {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Config { check: Some(path) } => {
            let config = SyncConfig::load(&path)?;
            println!("{} is valid", path.display());
            print!("{}", config.to_ron()?);
            println!();
        }
        Command::Config { check: None } => {
            println!("{}", SyncConfig::default().to_ron()?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_flags() {
        let cli = Cli::try_parse_from([
            "codesync",
            "simulate",
            "--clients",
            "5",
            "--typing-interval-ms",
            "30",
            "--strict",
        ])
        .unwrap();
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.clients, 5);
                assert_eq!(args.edits, 20);
                assert_eq!(args.typing_interval_ms, 30);
                assert!(args.strict);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
