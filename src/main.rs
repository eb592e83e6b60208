//! CLI Entry Point for ple-daq
//!
//! Runs PLE scans against simulated hardware and checks configuration files.
//!
//! # Usage
//!
//! Run a scan with the settings from `config/ple.toml`:
//! ```bash
//! ple-daq run --sweeps 10 --output data/scan.json
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! ple-daq --config my_setup.toml check-config
//! ```
//!
//! Ctrl+C ends a running scan after the current sweep.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ple_daq::config::{PleConfig, DEFAULT_CONFIG_PATH};
use ple_daq::hardware::mock::{MockRateCounter, MockWavelengthController};
use ple_daq::logging;
use ple_daq::scan::{run_scan, ScanController, ScanResults};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ple-daq")]
#[command(about = "Photoluminescence-excitation scans with simulated hardware", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan against the simulated laser and counter
    Run {
        /// Number of sweeps (overrides scan.max_sweep_index)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        sweeps: Option<u32>,

        /// Result file (overrides output.directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PleConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Run { sweeps, output } => run(config, sweeps, output).await,
        Commands::CheckConfig => {
            println!("{} is valid", cli.config.display());
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: PleConfig, sweeps: Option<u32>, output: Option<PathBuf>) -> Result<()> {
    let laser = MockWavelengthController::from(&config.actuator);
    let counter = MockRateCounter::from_config(&config.counter, Some(laser.probe()));

    let mut controller = ScanController::new(laser, counter);
    let mut settings = config.scan.clone();
    if let Some(sweeps) = sweeps {
        settings.max_sweep_index = sweeps.saturating_sub(1);
    }
    controller.apply_settings(&settings).await?;

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, finishing current sweep");
            stop.request_stop();
        }
    });

    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            let peak = update.count_rates.iter().copied().fold(f64::NAN, f64::max);
            info!(
                sweep = update.sweep_index,
                points = update.count_rates.len(),
                peak_rate = peak,
                "Sweep recorded"
            );
        }
    });

    let outcome = run_scan(&mut controller).await;
    let results = settle_outcome(outcome, controller.close().await)?;

    let path = output.or_else(|| {
        config
            .output
            .directory
            .as_ref()
            .map(|dir| dir.join(format!("ple_{}.json", results.run_id)))
    });
    match path {
        Some(path) => results.write_json(&path)?,
        None => info!(
            sweeps = results.sweeps_completed,
            "No output configured, results not saved"
        ),
    }

    let mean = results.mean_count_rate();
    if let Some((index, rate)) = mean
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    {
        let position = results
            .positions_by_sweep
            .first()
            .and_then(|positions| positions.get(index))
            .copied()
            .unwrap_or(f64::NAN);
        println!(
            "{} sweeps, peak mean rate {:.1} counts/s at {:.4} V",
            results.sweeps_completed, rate, position
        );
    }
    Ok(())
}

/// Combine the scan outcome with the result of closing the controller.
///
/// A scan error wins over a close error; the close error is only logged.
fn settle_outcome(
    outcome: ple_daq::AppResult<ScanResults>,
    closed: ple_daq::AppResult<()>,
) -> Result<ScanResults> {
    match outcome {
        Ok(results) => {
            closed?;
            Ok(results)
        }
        Err(err) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "Failed to close scan controller after scan error");
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ple_daq::ScanError;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_sweeps_rejected() {
        assert!(Cli::try_parse_from(["ple-daq", "run", "--sweeps", "0"]).is_err());

        let cli = Cli::try_parse_from(["ple-daq", "run", "--sweeps", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { sweeps: Some(3), .. }));
    }

    #[test]
    fn test_scan_error_wins_over_close_error() {
        let err = settle_outcome(
            Err(ScanError::InvalidStepSize(0.0)),
            Err(ScanError::ResourceClosed("scan controller")),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::InvalidStepSize(_))
        ));
    }

    #[test]
    fn test_close_error_reported_after_successful_scan() {
        let controller = ScanController::without_actuator(MockRateCounter::new(1.0), 0.0, 1.0);
        let err = settle_outcome(
            Ok(controller.results()),
            Err(ScanError::ResourceClosed("scan controller")),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::ResourceClosed(_))
        ));
    }
}
