#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for accident danger-zone analysis.
//!
//! * `accident_map analyze` loads a `GeoJSON` file of accident points, runs
//!   the full pipeline, and writes the clustered `GeoJSON`, cluster centers,
//!   and mobile alerts.
//! * `accident_map tune` runs only the parameter search and logs the ranked
//!   candidates.
//!
//! Uses `indicatif-log-bridge` (via [`accident_map_cli_utils::init_logger`])
//! so log lines and progress bars never fight for the terminal.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "accident_map", about = "Accident danger-zone analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster accidents and export danger zones and alerts
    Analyze {
        /// `GeoJSON` `FeatureCollection` of accident points
        #[arg(long)]
        input: PathBuf,

        /// Directory for the result files
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the configured clustering parameters instead of tuning
        #[arg(long)]
        no_tune: bool,

        /// Skip alert generation
        #[arg(long)]
        no_alerts: bool,

        /// Alert on the top N percent of clusters
        #[arg(long)]
        alert_percentile: Option<u8>,
    },
    /// Search clustering parameters and log the ranked results
    Tune {
        /// `GeoJSON` `FeatureCollection` of accident points
        #[arg(long)]
        input: PathBuf,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = accident_map_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            output_dir,
            config,
            no_tune,
            no_alerts,
            alert_percentile,
        } => commands::analyze(
            &multi,
            &commands::AnalyzeArgs {
                input,
                output_dir,
                config,
                tune: !no_tune,
                alerts: !no_alerts,
                alert_percentile,
            },
        )?,
        Commands::Tune { input, config } => commands::tune(&multi, &input, config.as_deref())?,
    }

    Ok(())
}
