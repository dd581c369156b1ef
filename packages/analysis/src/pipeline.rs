//! End-to-end danger-zone analysis.

use std::sync::Arc;

use accident_map_accident_models::{
    AccidentRecord, Alert, ClusterAssignment, ClusterSummary, RecordAnnotation,
};
use chrono::{DateTime, Utc};

use crate::AnalysisError;
use crate::alerts::AlertGenerator;
use crate::config::{AnalysisConfig, ClusteringParams};
use crate::density::{DensityClusterer, GreatCircleSpace};
use crate::geometry::{GeometrySummarizer, log_top_clusters};
use crate::noise::{NoiseReassigner, NoiseReassignment};
use crate::progress::{ProgressCallback, null_progress};
use crate::split::{SplitOutcome, SubclusterSplitter};
use crate::temporal::TemporalModel;
use crate::tuner::{ParameterTuner, TuningReport};

/// Summaries logged at the end of a run.
const TOP_CLUSTERS_REPORTED: usize = 10;

/// Optional stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Grid-search clustering parameters instead of using the configured
    /// ones.
    pub tune: bool,
    /// Derive alerts from the summaries.
    pub alerts: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tune: true,
            alerts: true,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Records that passed geographic filtering, in input order.
    pub records: Vec<AccidentRecord>,
    /// Final cluster assignment, parallel to `records`.
    pub assignment: ClusterAssignment,
    /// Per-record weight and trend, parallel to `records`.
    pub annotations: Vec<RecordAnnotation>,
    /// Cluster summaries, highest danger score first.
    pub summaries: Vec<ClusterSummary>,
    /// Alerts, in summary order. Empty when alerts are disabled.
    pub alerts: Vec<Alert>,
    /// Parameters the geographic clustering ran with.
    pub params: ClusteringParams,
    /// Ranked tuning candidates, when tuning ran.
    pub tuning: Option<TuningReport>,
    /// Outcome per oversized cluster.
    pub splits: Vec<SplitOutcome>,
    /// Noise reassignment totals.
    pub noise: NoiseReassignment,
}

/// Runs the analysis stages in order over one snapshot of records.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl AnalysisPipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            config,
            progress: null_progress(),
        })
    }

    /// Reports tuning progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs every stage. `now` anchors recency weights and the recent
    /// window.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NoValidRecords`] if no record has a valid
    /// position, or [`AnalysisError::Clustering`] if clustering fails.
    pub fn run(
        &self,
        records: Vec<AccidentRecord>,
        now: DateTime<Utc>,
        options: RunOptions,
    ) -> Result<PipelineOutput, AnalysisError> {
        let records = filter_valid(records)?;
        let space = GreatCircleSpace::from_records(&records);

        let (params, tuning) = if options.tune {
            let report = self.tune_space(&space)?;
            let params = report
                .best_params()
                .unwrap_or(self.config.clustering);
            (params, Some(report))
        } else {
            (self.config.clustering, None)
        };

        log::info!(
            "Clustering {} records (min_cluster_size={}, min_samples={}, epsilon={})",
            records.len(),
            params.min_cluster_size,
            params.min_samples,
            params.cluster_selection_epsilon
        );
        let mut assignment = DensityClusterer::new(params).assign(&space)?;
        log::info!(
            "Found {} clusters, {} noise records",
            assignment.cluster_count(),
            assignment.noise_count()
        );

        let model = TemporalModel::new(self.config.decay_rate, now);
        let annotations = model.annotate(&records);

        let splits = SubclusterSplitter::new(self.config.highway_cluster_threshold, model)
            .split(&records, &mut assignment)?;

        let noise = NoiseReassigner::new(self.config.noise_reassign_radius_km)
            .reassign(&records, &mut assignment);

        let summaries = GeometrySummarizer::new(model, self.config.recent_window_days)
            .summarize(&records, &assignment, &annotations);
        log::info!(
            "{} final clusters, {} noise records",
            summaries.len(),
            assignment.noise_count()
        );
        log_top_clusters(&summaries, TOP_CLUSTERS_REPORTED);

        let alerts = if options.alerts {
            AlertGenerator::new(self.config.alert_percentile, self.config.alert_radius_km)
                .generate(&summaries)
        } else {
            Vec::new()
        };

        Ok(PipelineOutput {
            records,
            assignment,
            annotations,
            summaries,
            alerts,
            params,
            tuning,
            splits,
            noise,
        })
    }

    /// Runs only the parameter search.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NoValidRecords`] if no record has a valid
    /// position, or [`AnalysisError::Clustering`] if clustering fails.
    pub fn tune(&self, records: Vec<AccidentRecord>) -> Result<TuningReport, AnalysisError> {
        let records = filter_valid(records)?;
        self.tune_space(&GreatCircleSpace::from_records(&records))
    }

    fn tune_space(&self, space: &GreatCircleSpace) -> Result<TuningReport, AnalysisError> {
        ParameterTuner::new(self.config.tuning.clone(), self.progress.clone()).tune(space)
    }
}

/// Drops records with out-of-range or non-finite coordinates.
fn filter_valid(records: Vec<AccidentRecord>) -> Result<Vec<AccidentRecord>, AnalysisError> {
    let total = records.len();
    let valid: Vec<AccidentRecord> = records
        .into_iter()
        .filter(AccidentRecord::has_valid_position)
        .collect();

    if valid.len() < total {
        log::warn!(
            "Dropped {} records with invalid coordinates",
            total - valid.len()
        );
    }
    if valid.is_empty() {
        return Err(AnalysisError::NoValidRecords);
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use accident_map_accident_models::DangerLevel;
    use chrono::TimeDelta;

    use super::*;
    use crate::config::TuningConfig;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixed(min_cluster_size: usize) -> AnalysisConfig {
        AnalysisConfig {
            clustering: ClusteringParams::from_cluster_size(min_cluster_size, 0.0001),
            ..AnalysisConfig::default()
        }
    }

    const NO_TUNING: RunOptions = RunOptions {
        tune: false,
        alerts: true,
    };

    /// Tight triangle (sides under 50 m), one day old, plus a two year old
    /// record 50 km away.
    fn triangle_and_outlier() -> Vec<AccidentRecord> {
        let day_old = now() - TimeDelta::days(1);
        vec![
            AccidentRecord::new(14.600_00, 121.000_00, day_old),
            AccidentRecord::new(14.600_30, 121.000_00, day_old),
            AccidentRecord::new(14.600_00, 121.000_30, day_old),
            AccidentRecord::new(14.150_00, 121.000_00, now() - TimeDelta::days(730)),
        ]
    }

    /// Hot spots of varying size around Metro Manila, with scattered noise.
    fn city() -> Vec<AccidentRecord> {
        let mut records = Vec::new();
        let spots = [(14.55, 120.98, 25, 3), (14.60, 121.03, 18, 40), (14.65, 121.08, 12, 400)];
        for (lat, lon, count, age_days) in spots {
            for i in 0..count {
                let offset = f64::from(i % 5) * 0.000_2;
                let row = f64::from(i / 5) * 0.000_2;
                records.push(AccidentRecord::new(
                    lat + row,
                    lon + offset,
                    now() - TimeDelta::days(age_days + i64::from(i)),
                ));
            }
        }
        for i in 0..6 {
            let step = f64::from(i);
            records.push(AccidentRecord::new(14.3 + step * 0.07, 120.5 + step * 0.11, now()));
        }
        records
    }

    fn partition(output: &PipelineOutput) -> (BTreeSet<Vec<usize>>, Vec<usize>) {
        let (clusters, noise) = output.assignment.partition();
        (clusters.into_iter().collect(), noise)
    }

    #[test]
    fn triangle_forms_one_cluster_and_outlier_stays_noise() {
        let pipeline = AnalysisPipeline::new(fixed(3)).unwrap();
        let output = pipeline.run(triangle_and_outlier(), now(), NO_TUNING).unwrap();

        assert_eq!(output.summaries.len(), 1);
        let summary = &output.summaries[0];
        assert_eq!(summary.accident_count, 3);
        assert!((summary.danger_score - 0.43).abs() < 0.005, "{}", summary.danger_score);
        assert!(summary.avg_trend_score.abs() < f64::EPSILON);
        assert_eq!(summary.recent_accidents, 3);
        assert!(summary.has_polygon());

        assert_eq!(output.assignment.get(3), None);
        assert_eq!(output.noise.reassigned, 0);
        assert_eq!(output.noise.remaining, 1);

        assert_eq!(output.alerts.len(), 1);
        assert_eq!(output.alerts[0].danger_level, DangerLevel::Medium);
        assert_eq!(
            output.alerts[0].alert_message,
            "Accident-prone area ahead. 3 recent accidents reported here. Drive carefully."
        );
    }

    #[test]
    fn invalid_coordinates_are_dropped() {
        let mut records = triangle_and_outlier();
        records.push(AccidentRecord::new(f64::NAN, 121.0, now()));
        records.push(AccidentRecord::new(95.0, 121.0, now()));
        let output = AnalysisPipeline::new(fixed(3))
            .unwrap()
            .run(records, now(), NO_TUNING)
            .unwrap();
        assert_eq!(output.records.len(), 4);
        assert_eq!(output.assignment.len(), 4);
    }

    #[test]
    fn no_valid_records_is_an_error() {
        let records = vec![AccidentRecord::new(100.0, 200.0, now())];
        let err = AnalysisPipeline::new(fixed(3))
            .unwrap()
            .run(records, now(), NO_TUNING)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NoValidRecords));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = AnalysisConfig {
            alert_radius_km: 0.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            AnalysisPipeline::new(config),
            Err(AnalysisError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn fixed_parameters_give_identical_partitions() {
        let pipeline = AnalysisPipeline::new(fixed(5)).unwrap();
        let first = pipeline.run(city(), now(), NO_TUNING).unwrap();
        let second = pipeline.run(city(), now(), NO_TUNING).unwrap();
        assert_eq!(partition(&first), partition(&second));
        assert_eq!(first.summaries, second.summaries);
    }

    #[test]
    fn noise_only_shrinks_through_reassignment() {
        let config = fixed(5);
        let records = city();
        let space = GreatCircleSpace::from_records(&records);
        let clustered = DensityClusterer::new(config.clustering).assign(&space).unwrap();
        let before: BTreeSet<usize> = clustered.noise_indices().into_iter().collect();

        let output = AnalysisPipeline::new(config)
            .unwrap()
            .run(records, now(), NO_TUNING)
            .unwrap();
        let after: BTreeSet<usize> = output.assignment.noise_indices().into_iter().collect();
        assert!(after.is_subset(&before));
        assert_eq!(
            before.len() - after.len(),
            output.noise.reassigned
        );
    }

    #[test]
    fn summaries_are_bounded_and_ordered() {
        let output = AnalysisPipeline::new(fixed(5))
            .unwrap()
            .run(city(), now(), NO_TUNING)
            .unwrap();

        assert!(output.summaries.len() >= 3);
        for pair in output.summaries.windows(2) {
            assert!(pair[0].danger_score >= pair[1].danger_score);
        }
        for summary in &output.summaries {
            assert!((0.0..=1.0).contains(&summary.danger_score));
            assert!(summary.display_radius_m >= 0.0);
        }
        let total: usize = output.summaries.iter().map(|s| s.accident_count).sum();
        assert_eq!(total + output.assignment.noise_count(), output.records.len());
    }

    #[test]
    fn summaries_are_rebuilt_identically_from_the_final_assignment() {
        let config = fixed(5);
        let output = AnalysisPipeline::new(config.clone())
            .unwrap()
            .run(city(), now(), NO_TUNING)
            .unwrap();

        let summarizer = GeometrySummarizer::new(
            TemporalModel::new(config.decay_rate, now()),
            config.recent_window_days,
        );
        let first = summarizer.summarize(&output.records, &output.assignment, &output.annotations);
        let second = summarizer.summarize(&output.records, &output.assignment, &output.annotations);

        assert_eq!(first, second);
        assert_eq!(first, output.summaries);
    }

    #[test]
    fn alerts_follow_summary_order_and_can_be_disabled() {
        let pipeline = AnalysisPipeline::new(fixed(5)).unwrap();
        let output = pipeline.run(city(), now(), NO_TUNING).unwrap();
        assert!(!output.alerts.is_empty());
        assert_eq!(output.alerts[0].cluster_id, output.summaries[0].cluster_id);

        let quiet = pipeline
            .run(
                city(),
                now(),
                RunOptions {
                    tune: false,
                    alerts: false,
                },
            )
            .unwrap();
        assert!(quiet.alerts.is_empty());
    }

    #[test]
    fn tuning_picks_parameters_from_the_grid() {
        let config = AnalysisConfig {
            tuning: TuningConfig {
                cluster_sizes: vec![5, 100],
                epsilons: vec![0.0, 0.000_01],
                ..TuningConfig::default()
            },
            ..AnalysisConfig::default()
        };
        let pipeline = AnalysisPipeline::new(config).unwrap();
        let output = pipeline.run(city(), now(), RunOptions::default()).unwrap();

        let report = output.tuning.as_ref().unwrap();
        assert_eq!(report.ranked.len(), 4);
        assert_eq!(output.params.min_cluster_size, 5);
        assert_eq!(report.best_params(), Some(output.params));
        assert_eq!(pipeline.tune(city()).unwrap(), *report);
    }
}
