//! Grid search over density clustering parameters.
//!
//! Every `(min_cluster_size, epsilon)` cell of the [`TuningConfig`] grid is
//! clustered in parallel. Cells producing more than one cluster are scored
//! with a silhouette coefficient over a seeded random sample; candidates
//! are ranked by `(has quality, quality, cluster count)`, best first.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::AnalysisError;
use crate::config::{ClusteringParams, TuningConfig};
use crate::density::{DensityClusterer, MetricSpace, cluster_count};
use crate::progress::ProgressCallback;
use crate::stats::round_to;

/// Outcome of clustering with one grid cell's parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningCandidate {
    /// Parameters the cell ran with.
    pub params: ClusteringParams,
    /// Non-noise clusters found.
    pub cluster_count: usize,
    /// Share of points labelled noise, to 3 decimal places.
    pub noise_fraction: f64,
    /// Sampled silhouette coefficient; `None` with fewer than two clusters
    /// or a degenerate sample.
    pub quality: Option<f64>,
}

impl TuningCandidate {
    /// Whether a quality score was computed.
    #[must_use]
    pub const fn has_quality(&self) -> bool {
        self.quality.is_some()
    }
}

/// Every grid cell's candidate, ranked best first.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningReport {
    /// Ranked candidates.
    pub ranked: Vec<TuningCandidate>,
}

impl TuningReport {
    /// The top-ranked candidate.
    #[must_use]
    pub fn best(&self) -> Option<&TuningCandidate> {
        self.ranked.first()
    }

    /// Parameters of the top-ranked candidate.
    #[must_use]
    pub fn best_params(&self) -> Option<ClusteringParams> {
        self.best().map(|c| c.params)
    }
}

/// Stable sort, best first: candidates with a quality score beat those
/// without, then higher quality, then more clusters.
pub fn rank_candidates(candidates: &mut [TuningCandidate]) {
    candidates.sort_by(|a, b| {
        b.has_quality()
            .cmp(&a.has_quality())
            .then_with(|| {
                b.quality
                    .unwrap_or(-1.0)
                    .total_cmp(&a.quality.unwrap_or(-1.0))
            })
            .then_with(|| b.cluster_count.cmp(&a.cluster_count))
    });
}

/// Runs the tuning grid.
pub struct ParameterTuner {
    config: TuningConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl ParameterTuner {
    /// Creates a tuner over `config`'s grid.
    #[must_use]
    pub fn new(config: TuningConfig, progress: Arc<dyn ProgressCallback>) -> Self {
        Self { config, progress }
    }

    /// Clusters `space` with every grid cell and ranks the results.
    ///
    /// # Errors
    ///
    /// Returns the first clustering error raised by any cell.
    pub fn tune<M: MetricSpace + ?Sized>(&self, space: &M) -> Result<TuningReport, AnalysisError> {
        let grid = self.config.grid();
        log::info!(
            "Tuning clustering parameters over {} combinations ({} points)",
            grid.len(),
            space.len()
        );
        self.progress.set_total(grid.len() as u64);
        self.progress
            .set_message("Tuning clustering parameters".to_string());

        let mut ranked = grid
            .par_iter()
            .enumerate()
            .map(|(index, &(size, epsilon))| {
                let candidate = self.evaluate(space, index, size, epsilon);
                self.progress.inc(1);
                candidate
            })
            .collect::<Result<Vec<_>, _>>()?;
        rank_candidates(&mut ranked);

        if let Some(best) = ranked.first() {
            log::info!(
                "Best parameters: min_cluster_size={} epsilon={} ({} clusters, quality {:?})",
                best.params.min_cluster_size,
                best.params.cluster_selection_epsilon,
                best.cluster_count,
                best.quality
            );
        }
        self.progress.finish_and_clear();

        Ok(TuningReport { ranked })
    }

    fn evaluate<M: MetricSpace + ?Sized>(
        &self,
        space: &M,
        index: usize,
        size: usize,
        epsilon: f64,
    ) -> Result<TuningCandidate, AnalysisError> {
        let params = ClusteringParams::from_cluster_size(size, epsilon);
        let labels = DensityClusterer::new(params).fit(space)?;

        let clusters = cluster_count(&labels);
        let noise = labels.iter().filter(|l| l.is_none()).count();
        #[allow(clippy::cast_precision_loss)]
        let noise_fraction = if labels.is_empty() {
            0.0
        } else {
            round_to(noise as f64 / labels.len() as f64, 3)
        };

        let quality = if clusters > 1 {
            let sample = self.sample(labels.len(), index);
            silhouette(space, &labels, &sample)
        } else {
            None
        };

        log::debug!(
            "min_cluster_size={size} epsilon={epsilon}: {clusters} clusters, \
             {:.1}% noise, quality {quality:?}",
            noise_fraction * 100.0
        );

        Ok(TuningCandidate {
            params,
            cluster_count: clusters,
            noise_fraction,
            quality,
        })
    }

    /// Point indices to score: everything when the data fits the sample
    /// size, otherwise a uniform sample without replacement seeded by
    /// `seed + cell index`.
    fn sample(&self, len: usize, cell: usize) -> Vec<usize> {
        if len <= self.config.sample_size {
            return (0..len).collect();
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(cell as u64));
        let mut picked = rand::seq::index::sample(&mut rng, len, self.config.sample_size).into_vec();
        picked.sort_unstable();
        picked
    }
}

/// Mean silhouette coefficient of `sample` under `space`'s distance.
///
/// Noise counts as one more label. Returns `None` when the sample holds
/// fewer than two labels or as many labels as points. A point alone in its
/// label scores 0.
#[must_use]
pub fn silhouette<M: MetricSpace + ?Sized>(
    space: &M,
    labels: &[Option<usize>],
    sample: &[usize],
) -> Option<f64> {
    let mut groups: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
    for &point in sample {
        groups.entry(labels[point]).or_default().push(point);
    }
    if groups.len() < 2 || groups.len() >= sample.len() {
        return None;
    }

    let mut total = 0.0;
    for &point in sample {
        let own = labels[point];
        let mut intra = None;
        let mut nearest_other = f64::INFINITY;

        for (label, members) in &groups {
            let sum: f64 = members
                .iter()
                .filter(|&&other| other != point)
                .map(|&other| space.distance(point, other))
                .sum();
            if *label == own {
                if members.len() > 1 {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = sum / (members.len() - 1) as f64;
                    intra = Some(mean);
                }
            } else {
                #[allow(clippy::cast_precision_loss)]
                let mean = sum / members.len() as f64;
                nearest_other = nearest_other.min(mean);
            }
        }

        if let Some(a) = intra {
            let b = nearest_other;
            let scale = a.max(b);
            if scale > 0.0 {
                total += (b - a) / scale;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let score = total / sample.len() as f64;
    score.is_finite().then_some(score)
}

#[cfg(test)]
mod tests {
    use crate::density::{FeatureSpace, GreatCircleSpace};
    use crate::progress::null_progress;

    use super::*;

    fn candidate(quality: Option<f64>, cluster_count: usize, size: usize) -> TuningCandidate {
        TuningCandidate {
            params: ClusteringParams::from_cluster_size(size, 0.0),
            cluster_count,
            noise_fraction: 0.0,
            quality,
        }
    }

    #[test]
    fn ranking_prefers_quality_then_clusters() {
        let mut candidates = vec![
            candidate(None, 40, 5),
            candidate(Some(0.2), 3, 10),
            candidate(Some(0.8), 2, 20),
            candidate(Some(0.2), 7, 30),
            candidate(Some(-0.5), 9, 50),
        ];
        rank_candidates(&mut candidates);
        let order: Vec<usize> = candidates.iter().map(|c| c.params.min_cluster_size).collect();
        assert_eq!(order, vec![20, 30, 10, 50, 5]);
    }

    #[test]
    fn ranking_is_stable_for_full_ties() {
        let mut candidates = vec![candidate(None, 0, 5), candidate(None, 0, 10)];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].params.min_cluster_size, 5);
    }

    #[test]
    fn silhouette_of_separated_groups_is_high() {
        let space = FeatureSpace::new(vec![[0.0, 0.0], [0.0, 1.0], [100.0, 0.0], [100.0, 1.0]]);
        let labels = vec![Some(0), Some(0), Some(1), Some(1)];
        let score = silhouette(&space, &labels, &[0, 1, 2, 3]).unwrap();
        assert!(score > 0.98, "{score}");
    }

    #[test]
    fn silhouette_rejects_degenerate_labelings() {
        let space = FeatureSpace::new(vec![[0.0], [1.0], [2.0]]);
        assert!(silhouette(&space, &[Some(0), Some(0), Some(0)], &[0, 1, 2]).is_none());
        assert!(silhouette(&space, &[Some(0), Some(1), None], &[0, 1, 2]).is_none());
    }

    #[test]
    fn silhouette_counts_noise_as_a_label() {
        let space = FeatureSpace::new(vec![[0.0], [0.5], [10.0]]);
        let score = silhouette(&space, &[Some(0), Some(0), None], &[0, 1, 2]).unwrap();
        // Points 0 and 1 score close to 1; the lone noise point scores 0.
        assert!(score > 0.6 && score < 0.67, "{score}");
    }

    fn two_hotspots() -> GreatCircleSpace {
        let mut positions = vec![(14.60, 121.00); 10];
        positions.extend(vec![(14.65, 121.05); 10]);
        GreatCircleSpace::from_degrees(&positions)
    }

    #[test]
    fn picks_the_cell_that_finds_structure() {
        let config = TuningConfig {
            cluster_sizes: vec![50, 3],
            epsilons: vec![0.0],
            sample_size: 2000,
            seed: 42,
        };
        let report = ParameterTuner::new(config, null_progress())
            .tune(&two_hotspots())
            .unwrap();

        assert_eq!(report.ranked.len(), 2);
        let best = report.best().unwrap();
        assert_eq!(best.params.min_cluster_size, 3);
        assert_eq!(best.params.min_samples, 2);
        assert_eq!(best.cluster_count, 2);
        assert!((best.quality.unwrap() - 1.0).abs() < 1e-9);

        let worst = &report.ranked[1];
        assert_eq!(worst.cluster_count, 0);
        assert!(worst.quality.is_none());
        assert!((worst.noise_fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sampling_is_seeded() {
        let config = TuningConfig {
            sample_size: 5,
            ..TuningConfig::default()
        };
        let tuner = ParameterTuner::new(config, null_progress());
        let a = tuner.sample(100, 3);
        assert_eq!(a, tuner.sample(100, 3));
        assert_eq!(a.len(), 5);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tuner.sample(4, 0), vec![0, 1, 2, 3]);
    }
}
