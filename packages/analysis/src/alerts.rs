//! Alerts for the highest-scoring danger zones.

use accident_map_accident_models::{Alert, ClusterSummary, DangerLevel, TrendDirection};

use crate::stats::percentile;

/// Turns ranked summaries into alerts for the top `percentile` percent.
#[derive(Debug, Clone, Copy)]
pub struct AlertGenerator {
    percentile: u8,
    radius_km: f64,
}

impl AlertGenerator {
    /// Creates a generator alerting on the top `percentile` percent of
    /// clusters with a geofence of `radius_km`.
    #[must_use]
    pub const fn new(percentile: u8, radius_km: f64) -> Self {
        Self {
            percentile,
            radius_km,
        }
    }

    /// Score a cluster must reach to raise an alert: the
    /// `(100 - percentile)`-th percentile of all scores.
    #[must_use]
    pub fn threshold(&self, summaries: &[ClusterSummary]) -> Option<f64> {
        let scores: Vec<f64> = summaries.iter().map(|s| s.danger_score).collect();
        percentile(&scores, 100.0 - f64::from(self.percentile))
    }

    /// One alert per summary at or above [`Self::threshold`], in the
    /// summaries' order.
    #[must_use]
    pub fn generate(&self, summaries: &[ClusterSummary]) -> Vec<Alert> {
        let Some(threshold) = self.threshold(summaries) else {
            log::info!("No clusters, no alerts");
            return Vec::new();
        };

        let alerts: Vec<Alert> = summaries
            .iter()
            .filter(|s| s.danger_score >= threshold)
            .map(|s| self.alert(s))
            .collect();

        log::info!(
            "Generated {} alerts for the top {}% of {} clusters (threshold {threshold:.4})",
            alerts.len(),
            self.percentile,
            summaries.len()
        );
        alerts
    }

    fn alert(&self, summary: &ClusterSummary) -> Alert {
        let trend = TrendDirection::from_trend(summary.avg_trend_score);
        Alert {
            cluster_id: summary.cluster_id,
            center_lat: summary.center_lat,
            center_lon: summary.center_lon,
            radius_km: self.radius_km,
            danger_level: DangerLevel::from_score(summary.danger_score),
            danger_score: summary.danger_score,
            accident_count: summary.accident_count,
            recent_accidents: summary.recent_accidents,
            trend,
            alert_message: alert_message(trend, summary.recent_accidents),
        }
    }
}

/// Driver-facing message. The recent-count sentence is omitted when there
/// are no recent accidents.
#[must_use]
pub fn alert_message(trend: TrendDirection, recent_accidents: usize) -> String {
    let mut message = String::from("Accident-prone area ahead");
    if trend == TrendDirection::Increasing {
        message.push_str(" with increasing accidents");
    }
    message.push_str(". ");
    if recent_accidents > 0 {
        message.push_str(&format!("{recent_accidents} recent accidents reported here. "));
    }
    message.push_str("Drive carefully.");
    message
}
