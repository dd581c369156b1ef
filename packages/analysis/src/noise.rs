//! Reassigns noise records to nearby clusters.
//!
//! Centroids are taken once, before any record moves, so a reassigned
//! record never shifts the centroid another noise record is measured
//! against.

use std::collections::BTreeMap;

use accident_map_accident_models::{AccidentRecord, ClusterAssignment, ClusterId};
use accident_map_spatial::haversine_km;

/// Clusters reported in the reassignment log line.
const TOP_RECEIVERS: usize = 5;

/// What a reassignment pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoiseReassignment {
    /// Noise records moved into a cluster.
    pub reassigned: usize,
    /// Noise records left as noise.
    pub remaining: usize,
    /// Records received per cluster.
    pub by_cluster: BTreeMap<ClusterId, usize>,
}

/// Moves noise records within `radius_km` of a cluster centroid into the
/// nearest such cluster.
#[derive(Debug, Clone, Copy)]
pub struct NoiseReassigner {
    radius_km: f64,
}

impl NoiseReassigner {
    /// Creates a reassigner with the given capture radius.
    #[must_use]
    pub const fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }

    /// Reassigns noise in `assignment` in place.
    ///
    /// A noise record joins the cluster whose centroid is nearest by
    /// haversine distance, provided that distance is at most the radius.
    /// Equidistant centroids resolve to the lowest cluster id. With no
    /// clusters, nothing changes.
    pub fn reassign(
        &self,
        records: &[AccidentRecord],
        assignment: &mut ClusterAssignment,
    ) -> NoiseReassignment {
        let noise = assignment.noise_indices();
        let centroids = centroids(records, assignment);

        if centroids.is_empty() || noise.is_empty() {
            log::info!(
                "Noise reassignment skipped ({} clusters, {} noise records)",
                centroids.len(),
                noise.len()
            );
            return NoiseReassignment {
                remaining: noise.len(),
                ..NoiseReassignment::default()
            };
        }

        let mut result = NoiseReassignment::default();
        for index in noise {
            let record = &records[index];
            let nearest = centroids
                .iter()
                .map(|&(id, lat, lon)| {
                    (
                        id,
                        haversine_km(record.latitude, record.longitude, lat, lon),
                    )
                })
                .fold(None, |best: Option<(ClusterId, f64)>, candidate| match best {
                    Some(best) if best.1 <= candidate.1 => Some(best),
                    _ => Some(candidate),
                });

            match nearest {
                Some((id, distance)) if distance <= self.radius_km => {
                    assignment.set(index, Some(id));
                    *result.by_cluster.entry(id).or_default() += 1;
                    result.reassigned += 1;
                }
                _ => result.remaining += 1,
            }
        }

        let mut receivers: Vec<(ClusterId, usize)> =
            result.by_cluster.iter().map(|(&id, &n)| (id, n)).collect();
        receivers.sort_by(|a, b| b.1.cmp(&a.1));
        let top: Vec<String> = receivers
            .iter()
            .take(TOP_RECEIVERS)
            .map(|(id, n)| format!("{id}: +{n}"))
            .collect();
        log::info!(
            "Reassigned {} noise records within {} km ({} remain noise); top clusters [{}]",
            result.reassigned,
            self.radius_km,
            result.remaining,
            top.join(", ")
        );

        result
    }
}

/// `(id, mean latitude, mean longitude)` per cluster, in id order.
fn centroids(
    records: &[AccidentRecord],
    assignment: &ClusterAssignment,
) -> Vec<(ClusterId, f64, f64)> {
    assignment
        .groups()
        .into_iter()
        .map(|(id, members)| {
            #[allow(clippy::cast_precision_loss)]
            let n = members.len() as f64;
            let lat = members.iter().map(|&i| records[i].latitude).sum::<f64>() / n;
            let lon = members.iter().map(|&i| records[i].longitude).sum::<f64>() / n;
            (id, lat, lon)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(lat: f64, lon: f64) -> AccidentRecord {
        AccidentRecord::new(lat, lon, now())
    }

    #[test]
    fn pulls_nearby_noise_into_cluster() {
        let records = vec![
            record(14.600, 121.000),
            record(14.600, 121.000),
            record(14.602, 121.000),
            record(15.000, 121.000),
        ];
        let mut assignment = ClusterAssignment::from_raw(&[0, 0, -1, -1]);

        let result = NoiseReassigner::new(0.5).reassign(&records, &mut assignment);

        assert_eq!(result.reassigned, 1);
        assert_eq!(result.remaining, 1);
        assert_eq!(assignment.to_raw(), vec![0, 0, 0, -1]);
        assert_eq!(result.by_cluster.get(&ClusterId::new(0)), Some(&1));
    }

    #[test]
    fn picks_nearest_centroid() {
        let records = vec![
            record(14.600, 121.000),
            record(14.610, 121.000),
            record(14.607, 121.000),
        ];
        let mut assignment = ClusterAssignment::from_raw(&[3, 8, -1]);
        NoiseReassigner::new(1.0).reassign(&records, &mut assignment);
        assert_eq!(assignment.to_raw(), vec![3, 8, 8]);
    }

    #[test]
    fn equidistant_centroids_resolve_to_lowest_id() {
        let records = vec![
            record(0.0, 0.01),
            record(0.0, -0.01),
            record(0.0, 0.0),
        ];
        let mut assignment = ClusterAssignment::from_raw(&[7, 2, -1]);
        NoiseReassigner::new(5.0).reassign(&records, &mut assignment);
        assert_eq!(assignment.get(2), Some(ClusterId::new(2)));
    }

    #[test]
    fn centroids_ignore_records_moved_in_the_same_pass() {
        // The last record is out of range of the original centroid but
        // would be in range of one dragged toward it by the middle record.
        let records = vec![
            record(0.0, 0.0),
            record(0.0, 0.004),
            record(0.0, 0.006),
        ];
        let mut assignment = ClusterAssignment::from_raw(&[1, -1, -1]);
        let result = NoiseReassigner::new(0.5).reassign(&records, &mut assignment);
        assert_eq!(result.reassigned, 1);
        assert_eq!(assignment.to_raw(), vec![1, 1, -1]);
    }

    #[test]
    fn no_clusters_means_no_change() {
        let records = vec![record(14.6, 121.0), record(14.6, 121.0)];
        let mut assignment = ClusterAssignment::all_noise(2);
        let result = NoiseReassigner::new(0.5).reassign(&records, &mut assignment);
        assert_eq!(result.reassigned, 0);
        assert_eq!(result.remaining, 2);
        assert_eq!(assignment.noise_count(), 2);
    }
}
