//! Re-clusters oversized clusters in a spatio-temporal feature space.
//!
//! Long road corridors tend to come out of geographic clustering as one
//! huge cluster. Each cluster above the size threshold is re-clustered on
//! `[z_lat * w, z_lon * w, w, trend * 10]` (w = recency weight) so that
//! recent, rising segments separate from stale ones.

use std::collections::BTreeMap;

use accident_map_accident_models::{AccidentRecord, ClusterAssignment, ClusterId};

use crate::AnalysisError;
use crate::config::ClusteringParams;
use crate::density::{DensityClusterer, FeatureSpace, cluster_count};
use crate::stats::mean;
use crate::temporal::{TemporalModel, trend_signal};

/// Selection epsilon used when re-clustering in feature space.
pub const SPLIT_EPSILON: f64 = 0.1;

/// Trend values are scaled by this in the feature vector.
const TREND_SCALE: f64 = 10.0;

/// What happened to one oversized cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// The cluster was replaced by `children`; `noise` members were released
    /// to the global noise pool.
    Split {
        /// The replaced cluster.
        parent: ClusterId,
        /// Fresh ids, in order of first appearance among the members.
        children: Vec<ClusterId>,
        /// Members the sub-clustering labelled noise.
        noise: usize,
    },
    /// Fewer than two sub-clusters were found; the cluster is kept as is.
    Unchanged {
        /// The cluster left in place.
        cluster: ClusterId,
        /// Sub-clusters found.
        sub_clusters: usize,
    },
}

/// Density parameters scaled to a cluster of `count` members.
#[must_use]
pub fn adaptive_params(count: usize) -> ClusteringParams {
    ClusteringParams {
        min_cluster_size: (count / 20).max(10),
        min_samples: (count / 40).max(5),
        cluster_selection_epsilon: SPLIT_EPSILON,
    }
}

/// Z-scores using the population standard deviation; a constant series
/// gets a divisor of 1.
fn standardize(values: &[f64]) -> Vec<f64> {
    let Some(center) = mean(values) else {
        return Vec::new();
    };
    let variance = mean(
        &values
            .iter()
            .map(|v| (v - center).powi(2))
            .collect::<Vec<_>>(),
    )
    .unwrap_or(0.0);
    let std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
    values.iter().map(|v| (v - center) / std).collect()
}

/// Feature vector per member. Weights and trends are computed over the
/// members alone.
#[must_use]
pub fn feature_vectors(model: &TemporalModel, members: &[&AccidentRecord]) -> Vec<[f64; 4]> {
    let lats: Vec<f64> = members.iter().map(|r| r.latitude).collect();
    let lons: Vec<f64> = members.iter().map(|r| r.longitude).collect();
    let z_lat = standardize(&lats);
    let z_lon = standardize(&lons);
    let trends = trend_signal(members);

    members
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let weight = model.weight(record.timestamp);
            [
                z_lat[i] * weight,
                z_lon[i] * weight,
                weight,
                trends[i] * TREND_SCALE,
            ]
        })
        .collect()
}

/// Splits clusters with more than `threshold` members.
#[derive(Debug, Clone, Copy)]
pub struct SubclusterSplitter {
    threshold: usize,
    model: TemporalModel,
}

impl SubclusterSplitter {
    /// Creates a splitter.
    #[must_use]
    pub const fn new(threshold: usize, model: TemporalModel) -> Self {
        Self { threshold, model }
    }

    /// Splits every oversized cluster of `assignment` in place, visiting
    /// clusters in ascending id order. New ids are allocated above the
    /// largest id present before splitting.
    ///
    /// # Errors
    ///
    /// Propagates [`AnalysisError::Clustering`] from the feature-space
    /// clustering.
    pub fn split(
        &self,
        records: &[AccidentRecord],
        assignment: &mut ClusterAssignment,
    ) -> Result<Vec<SplitOutcome>, AnalysisError> {
        let oversized: Vec<(ClusterId, Vec<usize>)> = assignment
            .groups()
            .into_iter()
            .filter(|(_, members)| members.len() > self.threshold)
            .collect();

        if oversized.is_empty() {
            log::debug!("No cluster exceeds {} members", self.threshold);
            return Ok(Vec::new());
        }
        log::info!(
            "{} clusters exceed {} members, sub-clustering",
            oversized.len(),
            self.threshold
        );

        let mut allocator = assignment.id_allocator();
        let mut outcomes = Vec::with_capacity(oversized.len());

        for (parent, members) in oversized {
            let refs: Vec<&AccidentRecord> = members.iter().map(|&i| &records[i]).collect();
            let space = FeatureSpace::new(feature_vectors(&self.model, &refs));
            let params = adaptive_params(members.len());
            let labels = DensityClusterer::new(params).fit(&space)?;

            let sub_clusters = cluster_count(&labels);
            if sub_clusters < 2 {
                log::info!(
                    "Cluster {parent} ({} members): {sub_clusters} sub-clusters, left unsplit",
                    members.len()
                );
                outcomes.push(SplitOutcome::Unchanged {
                    cluster: parent,
                    sub_clusters,
                });
                continue;
            }

            let mut fresh: BTreeMap<usize, ClusterId> = BTreeMap::new();
            let mut children = Vec::with_capacity(sub_clusters);
            let mut noise = 0;
            for (&index, label) in members.iter().zip(&labels) {
                let id = label.map(|label| {
                    *fresh.entry(label).or_insert_with(|| {
                        let id = allocator.allocate();
                        children.push(id);
                        id
                    })
                });
                if id.is_none() {
                    noise += 1;
                }
                assignment.set(index, id);
            }

            log::info!(
                "Cluster {parent} ({} members) split into {} sub-clusters, {noise} members to noise",
                members.len(),
                children.len()
            );
            outcomes.push(SplitOutcome::Split {
                parent,
                children,
                noise,
            });
        }

        Ok(outcomes)
    }
}
