//! Composite danger score.
//!
//! `0.4 * mean(weight) + 0.3 * clamp(mean(trend), 0, 1) + 0.3 * min(count / 100, 1)`,
//! rounded to 4 decimal places. Always within `[0, 1]`: trend slopes are
//! unbounded, so the trend term saturates at 1 like the volume term.

use accident_map_accident_models::AccidentRecord;

use crate::stats::{mean, round_to};
use crate::temporal::{TemporalModel, trend_signal};

/// Weight of the mean recency term.
pub const RECENCY_WEIGHT: f64 = 0.4;
/// Weight of the positive trend term.
pub const TREND_WEIGHT: f64 = 0.3;
/// Weight of the volume term.
pub const VOLUME_WEIGHT: f64 = 0.3;
/// Member count at which the volume term saturates.
pub const VOLUME_SATURATION: f64 = 100.0;

/// Combines precomputed cluster statistics into a rounded score.
#[must_use]
pub fn composite_score(mean_weight: f64, mean_trend: f64, count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let volume = (count as f64 / VOLUME_SATURATION).min(1.0);
    let score = VOLUME_WEIGHT.mul_add(
        volume,
        RECENCY_WEIGHT.mul_add(mean_weight, TREND_WEIGHT * mean_trend.clamp(0.0, 1.0)),
    );
    round_to(score, 4)
}

/// Danger score of one cluster's members.
///
/// Trend values are recomputed over `members` alone, so the trend term
/// reflects the cluster's own bounding box rather than the whole data set.
/// An empty cluster scores 0.
#[must_use]
pub fn danger_score(model: &TemporalModel, members: &[&AccidentRecord]) -> f64 {
    let weights: Vec<f64> = members.iter().map(|r| model.weight(r.timestamp)).collect();
    let Some(mean_weight) = mean(&weights) else {
        return 0.0;
    };
    let mean_trend = mean(&trend_signal(members)).unwrap_or(0.0);
    composite_score(mean_weight, mean_trend, members.len())
}
