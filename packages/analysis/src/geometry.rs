//! Per-cluster statistics and geometry.

use std::collections::BTreeSet;

use accident_map_accident_models::{
    AccidentRecord, ClusterAssignment, ClusterId, ClusterSummary, RecordAnnotation,
};
use accident_map_spatial::{convex_hull, haversine_km};

use crate::scoring::danger_score;
use crate::stats::{mean, percentile, round_to};
use crate::temporal::TemporalModel;

/// Percentile of member distances used as the display radius.
pub const DISPLAY_RADIUS_PERCENTILE: f64 = 95.0;

/// Record attribute naming the barangay (district) of an accident.
pub const BARANGAY_ATTRIBUTE: &str = "barangay";

/// Builds a [`ClusterSummary`] for every cluster of a settled assignment.
#[derive(Debug, Clone, Copy)]
pub struct GeometrySummarizer {
    model: TemporalModel,
    recent_window_days: i64,
}

impl GeometrySummarizer {
    /// Creates a summarizer.
    #[must_use]
    pub const fn new(model: TemporalModel, recent_window_days: i64) -> Self {
        Self {
            model,
            recent_window_days,
        }
    }

    /// Summaries of every cluster, highest danger score first. Clusters
    /// with equal scores keep ascending id order.
    #[must_use]
    pub fn summarize(
        &self,
        records: &[AccidentRecord],
        assignment: &ClusterAssignment,
        annotations: &[RecordAnnotation],
    ) -> Vec<ClusterSummary> {
        let mut summaries: Vec<ClusterSummary> = assignment
            .groups()
            .into_iter()
            .filter_map(|(id, members)| self.summarize_cluster(id, &members, records, annotations))
            .collect();

        summaries.sort_by(|a, b| b.danger_score.total_cmp(&a.danger_score));
        summaries
    }

    fn summarize_cluster(
        &self,
        cluster_id: ClusterId,
        members: &[usize],
        records: &[AccidentRecord],
        annotations: &[RecordAnnotation],
    ) -> Option<ClusterSummary> {
        let refs: Vec<&AccidentRecord> = members.iter().map(|&i| &records[i]).collect();

        let lats: Vec<f64> = refs.iter().map(|r| r.latitude).collect();
        let lons: Vec<f64> = refs.iter().map(|r| r.longitude).collect();
        let center_lat = mean(&lats)?;
        let center_lon = mean(&lons)?;

        let display = display_center(&refs, center_lat, center_lon)?;
        let distances_m: Vec<f64> = refs
            .iter()
            .map(|r| {
                haversine_km(r.latitude, r.longitude, display.latitude, display.longitude) * 1000.0
            })
            .collect();
        let display_radius_m = round_to(
            percentile(&distances_m, DISPLAY_RADIUS_PERCENTILE).unwrap_or(0.0),
            2,
        );

        let points: Vec<(f64, f64)> = lons.iter().copied().zip(lats.iter().copied()).collect();
        let boundary = if points.len() >= 3 {
            convex_hull(&points)
        } else {
            points
        };

        let weights: Vec<f64> = members
            .iter()
            .map(|&i| annotations[i].temporal_weight)
            .collect();
        let trends: Vec<f64> = members.iter().map(|&i| annotations[i].trend_score).collect();

        let recent_accidents = refs
            .iter()
            .filter(|r| self.model.is_recent(r.timestamp, self.recent_window_days))
            .count();

        Some(ClusterSummary {
            cluster_id,
            center_lat,
            center_lon,
            accident_count: members.len(),
            danger_score: danger_score(&self.model, &refs),
            recent_accidents,
            avg_temporal_weight: round_to(mean(&weights).unwrap_or(0.0), 4),
            avg_trend_score: round_to(mean(&trends).unwrap_or(0.0), 4),
            display_center_lat: display.latitude,
            display_center_lon: display.longitude,
            display_radius_m,
            barangays: barangays(&refs),
            boundary,
        })
    }
}

/// Distinct non-null barangay values of `members`, first seen first.
/// Non-string values are kept in their JSON text form.
fn barangays(members: &[&AccidentRecord]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    members
        .iter()
        .filter_map(|r| match r.attributes.get(BARANGAY_ATTRIBUTE)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(name) => Some(name.clone()),
            other => Some(other.to_string()),
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// The member nearest the mean position by squared degree distance; the
/// first such member on ties.
fn display_center<'a>(
    members: &[&'a AccidentRecord],
    center_lat: f64,
    center_lon: f64,
) -> Option<&'a AccidentRecord> {
    let squared = |r: &AccidentRecord| {
        (r.latitude - center_lat).powi(2) + (r.longitude - center_lon).powi(2)
    };
    members
        .iter()
        .copied()
        .fold(None, |best: Option<&AccidentRecord>, record| match best {
            Some(best) if squared(best) <= squared(record) => Some(best),
            _ => Some(record),
        })
}

/// Logs the `limit` highest-scoring summaries.
pub fn log_top_clusters(summaries: &[ClusterSummary], limit: usize) {
    log::info!("Top {} danger zones:", limit.min(summaries.len()));
    for (rank, summary) in summaries.iter().take(limit).enumerate() {
        log::info!(
            "  {}. cluster {} score={:.4} accidents={} recent={} center=({:.5}, {:.5}) radius={}m",
            rank + 1,
            summary.cluster_id,
            summary.danger_score,
            summary.accident_count,
            summary.recent_accidents,
            summary.display_center_lat,
            summary.display_center_lon,
            summary.display_radius_m
        );
    }
}

#[cfg(test)]
mod tests {
    use accident_map_accident_models::Attributes;
    use chrono::{DateTime, TimeDelta, Utc};

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn summarizer() -> GeometrySummarizer {
        GeometrySummarizer::new(TemporalModel::new(0.15, now()), 365)
    }

    fn annotate(records: &[AccidentRecord]) -> Vec<RecordAnnotation> {
        TemporalModel::new(0.15, now()).annotate(records)
    }

    #[test]
    fn display_center_is_a_real_member() {
        let records = vec![
            AccidentRecord::new(0.0, 0.0, now()),
            AccidentRecord::new(0.0, 0.01, now()),
            AccidentRecord::new(0.0, 0.03, now()),
        ];
        let assignment = ClusterAssignment::from_raw(&[0, 0, 0]);
        let summaries = summarizer().summarize(&records, &assignment, &annotate(&records));

        let summary = &summaries[0];
        assert!((summary.center_lon - 0.04 / 3.0).abs() < 1e-12);
        assert!((summary.display_center_lon - 0.01).abs() < f64::EPSILON);
        assert!(summary.display_center_lat.abs() < f64::EPSILON);
    }

    #[test]
    fn radius_is_95th_percentile_in_meters() {
        let records = vec![
            AccidentRecord::new(0.0, 0.0, now()),
            AccidentRecord::new(0.0, 0.0, now()),
            AccidentRecord::new(0.0, 0.001, now()),
        ];
        let assignment = ClusterAssignment::from_raw(&[0, 0, 0]);
        let summary = &summarizer().summarize(&records, &assignment, &annotate(&records))[0];

        // Distances from (0, 0): [0, 0, d]; 95th percentile = 0.9 * d.
        let d = haversine_km(0.0, 0.0, 0.0, 0.001) * 1000.0;
        assert!((summary.display_radius_m - round_to(0.9 * d, 2)).abs() < 1e-9);
    }

    #[test]
    fn small_clusters_keep_raw_points_as_boundary() {
        let records = vec![
            AccidentRecord::new(14.6, 121.0, now()),
            AccidentRecord::new(14.7, 121.1, now()),
        ];
        let assignment = ClusterAssignment::from_raw(&[5, 5]);
        let summary = &summarizer().summarize(&records, &assignment, &annotate(&records))[0];
        assert_eq!(summary.boundary, vec![(121.0, 14.6), (121.1, 14.7)]);
        assert!(!summary.has_polygon());
    }

    #[test]
    fn hull_is_closed_and_contains_members() {
        let records: Vec<AccidentRecord> = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.5, 0.5)]
            .iter()
            .map(|&(lat, lon)| AccidentRecord::new(lat, lon, now()))
            .collect();
        let assignment = ClusterAssignment::from_raw(&[0; 5]);
        let summary = &summarizer().summarize(&records, &assignment, &annotate(&records))[0];

        assert!(summary.has_polygon());
        assert_eq!(summary.boundary.first(), summary.boundary.last());
        assert_eq!(summary.boundary.len(), 5);
        assert!(!summary.boundary.contains(&(0.5, 0.5)));
        for vertex in &summary.boundary {
            assert!(
                records
                    .iter()
                    .any(|r| (r.longitude, r.latitude) == *vertex)
            );
        }
    }

    #[test]
    fn collinear_members_have_empty_polygon() {
        let records: Vec<AccidentRecord> = (0..4)
            .map(|i| AccidentRecord::new(0.0, f64::from(i) * 0.001, now()))
            .collect();
        let assignment = ClusterAssignment::from_raw(&[0; 4]);
        let summary = &summarizer().summarize(&records, &assignment, &annotate(&records))[0];
        assert!(summary.boundary.is_empty());
    }

    #[test]
    fn counts_recent_members_and_averages_annotations() {
        let records = vec![
            AccidentRecord::new(14.6, 121.0, now() - TimeDelta::days(10)),
            AccidentRecord::new(14.6, 121.0, now() - TimeDelta::days(400)),
        ];
        let assignment = ClusterAssignment::from_raw(&[0, 0]);
        let annotations = vec![
            RecordAnnotation {
                temporal_weight: 0.9,
                trend_score: 0.5,
            },
            RecordAnnotation {
                temporal_weight: 0.4,
                trend_score: -0.1,
            },
        ];
        let summary = &summarizer().summarize(&records, &assignment, &annotations)[0];
        assert_eq!(summary.recent_accidents, 1);
        assert_eq!(summary.accident_count, 2);
        assert!((summary.avg_temporal_weight - 0.65).abs() < 1e-12);
        assert!((summary.avg_trend_score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn summaries_are_sorted_by_score_descending() {
        let mut records = Vec::new();
        let mut raw = Vec::new();
        for _ in 0..2 {
            records.push(AccidentRecord::new(10.0, 120.0, now() - TimeDelta::days(2000)));
            raw.push(0);
        }
        for _ in 0..30 {
            records.push(AccidentRecord::new(14.6, 121.0, now()));
            raw.push(1);
        }
        records.push(AccidentRecord::new(12.0, 122.0, now()));
        raw.push(-1);

        let assignment = ClusterAssignment::from_raw(&raw);
        let summaries = summarizer().summarize(&records, &assignment, &annotate(&records));

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].cluster_id, ClusterId::new(1));
        assert!(summaries[0].danger_score >= summaries[1].danger_score);
        assert!(summaries.iter().all(|s| (0.0..=1.0).contains(&s.danger_score)));
    }

    fn with_barangay(record: AccidentRecord, value: serde_json::Value) -> AccidentRecord {
        let mut attributes = Attributes::new();
        attributes.insert(BARANGAY_ATTRIBUTE.to_string(), value);
        record.with_attributes(attributes)
    }

    #[test]
    fn collects_distinct_barangays_in_first_seen_order() {
        let at = |lon| AccidentRecord::new(14.6, lon, now());
        let records = vec![
            with_barangay(at(121.0), serde_json::Value::from("San Roque")),
            at(121.001),
            with_barangay(at(121.002), serde_json::Value::from("Poblacion")),
            with_barangay(at(121.003), serde_json::Value::Null),
            with_barangay(at(121.004), serde_json::Value::from("San Roque")),
            with_barangay(at(121.005), serde_json::Value::from(7)),
            with_barangay(at(121.006), serde_json::Value::from("Elsewhere")),
        ];
        let assignment = ClusterAssignment::from_raw(&[0, 0, 0, 0, 0, 0, -1]);
        let summaries = summarizer().summarize(&records, &assignment, &annotate(&records));

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].barangays, vec!["San Roque", "Poblacion", "7"]);
    }

    #[test]
    fn clusters_without_barangays_have_none() {
        let records = vec![
            AccidentRecord::new(14.6, 121.0, now()),
            AccidentRecord::new(14.6, 121.001, now()),
        ];
        let assignment = ClusterAssignment::from_raw(&[0, 0]);
        let summary = &summarizer().summarize(&records, &assignment, &annotate(&records))[0];
        assert!(summary.barangays.is_empty());
    }
}
