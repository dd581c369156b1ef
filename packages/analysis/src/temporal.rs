//! Recency weights and local trend signals.
//!
//! Both are pure functions of the records and the processing instant:
//!
//! * [`TemporalModel::weight`] decays exponentially with record age,
//!   `exp(-decay_rate * age_days / 365.25)`.
//! * [`trend_signal`] fits a monthly-count regression per cell of a 50x50
//!   grid over the records' bounding box and hands every record its cell's
//!   slope, suppressing weak fits.

use std::collections::BTreeMap;

use accident_map_accident_models::{AccidentRecord, RecordAnnotation};
use chrono::{DateTime, Datelike, TimeDelta, Utc};

use crate::stats::linear_regression;

/// Average year length used to scale record age.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Grid resolution per axis for trend binning.
pub const TREND_GRID_BINS: usize = 50;

/// Cells with fewer observed months report no trend.
pub const MIN_TREND_MONTHS: usize = 3;

/// Fits with `|r|` at or below this are reported as 0.
pub const TREND_CORRELATION_THRESHOLD: f64 = 0.3;

const SECONDS_PER_DAY: i64 = 86_400;

/// Recency model anchored at the processing instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalModel {
    decay_rate: f64,
    now: DateTime<Utc>,
}

impl TemporalModel {
    /// Creates a model decaying at `decay_rate` per year before `now`.
    #[must_use]
    pub const fn new(decay_rate: f64, now: DateTime<Utc>) -> Self {
        Self { decay_rate, now }
    }

    /// The processing instant.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whole days between `timestamp` and now, floored. Future timestamps
    /// count as age 0.
    #[must_use]
    pub fn age_days(&self, timestamp: DateTime<Utc>) -> i64 {
        (self.now - timestamp)
            .num_seconds()
            .div_euclid(SECONDS_PER_DAY)
            .max(0)
    }

    /// Recency weight in `(0, 1]`; 1.0 for a record dated now.
    #[must_use]
    pub fn weight(&self, timestamp: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let age = self.age_days(timestamp) as f64;
        (-self.decay_rate * age / DAYS_PER_YEAR).exp()
    }

    /// Whether `timestamp` falls strictly inside the last `window_days`.
    #[must_use]
    pub fn is_recent(&self, timestamp: DateTime<Utc>, window_days: i64) -> bool {
        TimeDelta::try_days(window_days)
            .and_then(|window| self.now.checked_sub_signed(window))
            .is_some_and(|cutoff| timestamp > cutoff)
    }

    /// Per-record temporal weight and dataset-wide trend value.
    #[must_use]
    pub fn annotate(&self, records: &[AccidentRecord]) -> Vec<RecordAnnotation> {
        let refs: Vec<&AccidentRecord> = records.iter().collect();
        let trends = trend_signal(&refs);
        records
            .iter()
            .zip(trends)
            .map(|(record, trend_score)| RecordAnnotation {
                temporal_weight: self.weight(record.timestamp),
                trend_score,
            })
            .collect()
    }
}

/// Equal-width, right-closed bins over one axis; the lowest edge is closed
/// too so the minimum lands in bin 0.
#[derive(Debug, Clone, Copy)]
struct AxisBins {
    min: f64,
    width: f64,
}

impl AxisBins {
    fn new(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        #[allow(clippy::cast_precision_loss)]
        let width = (max - min) / TREND_GRID_BINS as f64;
        Self { min, width }
    }

    fn index(self, value: f64) -> usize {
        if self.width.is_nan() || self.width <= 0.0 {
            return 0;
        }
        let position = ((value - self.min) / self.width).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bin = (position as usize).saturating_sub(1);
        bin.min(TREND_GRID_BINS - 1)
    }
}

/// Calendar month as a sortable ordinal.
fn month_key(timestamp: DateTime<Utc>) -> i64 {
    i64::from(timestamp.year()) * 12 + i64::from(timestamp.month0())
}

/// Trend value for every record, in input order.
///
/// Records are binned on a 50x50 grid over their own bounding box. For each
/// cell with at least three distinct months of activity, monthly counts in
/// calendar order are regressed on their ordinal; the slope is kept when
/// `|r| > 0.3`, otherwise the cell's trend is 0.
#[must_use]
pub fn trend_signal(records: &[&AccidentRecord]) -> Vec<f64> {
    if records.is_empty() {
        return Vec::new();
    }

    let lat_bins = AxisBins::new(records.iter().map(|r| r.latitude));
    let lon_bins = AxisBins::new(records.iter().map(|r| r.longitude));

    let cells: Vec<(usize, usize)> = records
        .iter()
        .map(|r| (lat_bins.index(r.latitude), lon_bins.index(r.longitude)))
        .collect();

    let mut monthly: BTreeMap<(usize, usize), BTreeMap<i64, u32>> = BTreeMap::new();
    for (record, cell) in records.iter().zip(&cells) {
        *monthly
            .entry(*cell)
            .or_default()
            .entry(month_key(record.timestamp))
            .or_default() += 1;
    }

    let trends: BTreeMap<(usize, usize), f64> = monthly
        .into_iter()
        .map(|(cell, months)| {
            let counts: Vec<f64> = months.values().map(|&c| f64::from(c)).collect();
            (cell, cell_trend(&counts))
        })
        .collect();

    cells
        .iter()
        .map(|cell| trends.get(cell).copied().unwrap_or(0.0))
        .collect()
}

fn cell_trend(monthly_counts: &[f64]) -> f64 {
    if monthly_counts.len() < MIN_TREND_MONTHS {
        return 0.0;
    }
    match linear_regression(monthly_counts) {
        Some((slope, r)) if r.abs() > TREND_CORRELATION_THRESHOLD => slope,
        _ => 0.0,
    }
}
