//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::time::Instant;

use accident_map_analysis::pipeline::RunOptions;
use accident_map_analysis::tuner::TuningReport;
use accident_map_analysis::{AnalysisConfig, AnalysisPipeline};
use accident_map_cli_utils::{IndicatifProgress, MultiProgress};
use chrono::Utc;

/// Options for `accident_map analyze`.
pub struct AnalyzeArgs {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub tune: bool,
    pub alerts: bool,
    pub alert_percentile: Option<u8>,
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    })
}

/// Runs the full analysis and writes every result file.
///
/// Nothing is written if loading or analysis fails.
///
/// # Errors
///
/// Returns an error if the configuration or input cannot be read, the
/// analysis fails, or a result file cannot be written.
pub fn analyze(multi: &MultiProgress, args: &AnalyzeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let now = Utc::now();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(percentile) = args.alert_percentile {
        config.alert_percentile = percentile;
    }

    let records = accident_map_io::load_records(&args.input, now)?;

    let mut pipeline = AnalysisPipeline::new(config)?;
    if args.tune {
        pipeline = pipeline
            .with_progress(IndicatifProgress::grid_bar(multi, "Tuning clustering parameters"));
    }

    let stage = IndicatifProgress::stage_spinner(multi, "Analyzing accidents");
    let output = pipeline.run(
        records,
        now,
        RunOptions {
            tune: args.tune,
            alerts: args.alerts,
        },
    )?;
    stage.finish(format!(
        "Analyzed {} records into {} clusters",
        output.records.len(),
        output.summaries.len()
    ));

    let written = accident_map_io::write_outputs(&output, &args.output_dir, args.alerts)?;

    log::info!(
        "Wrote {} files to {} in {:.1}s",
        written.len(),
        args.output_dir.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Runs only the parameter search and logs the ranked candidates.
///
/// # Errors
///
/// Returns an error if the configuration or input cannot be read or
/// clustering fails.
pub fn tune(
    multi: &MultiProgress,
    input: &Path,
    config: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let records = accident_map_io::load_records(input, Utc::now())?;

    let report = AnalysisPipeline::new(config)?
        .with_progress(IndicatifProgress::grid_bar(multi, "Tuning clustering parameters"))
        .tune(records)?;

    log_report(&report);
    Ok(())
}

fn log_report(report: &TuningReport) {
    log::info!(
        "{:>4}  {:>16}  {:>10}  {:>8}  {:>6}  {:>8}",
        "rank",
        "min_cluster_size",
        "epsilon",
        "clusters",
        "noise",
        "quality"
    );
    for (rank, candidate) in report.ranked.iter().enumerate() {
        let quality = candidate
            .quality
            .map_or_else(|| "-".to_string(), |q| format!("{q:.4}"));
        log::info!(
            "{:>4}  {:>16}  {:>10.2e}  {:>8}  {:>6.3}  {:>8}",
            rank + 1,
            candidate.params.min_cluster_size,
            candidate.params.cluster_selection_epsilon,
            candidate.cluster_count,
            candidate.noise_fraction,
            quality
        );
    }
}
