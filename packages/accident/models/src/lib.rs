#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Accident record, cluster assignment, and danger-zone output types.
//!
//! These are the values that flow through the danger-zone analysis
//! pipeline: immutable [`AccidentRecord`] inputs, the single mutable
//! [`ClusterAssignment`], and the derived [`ClusterSummary`] and [`Alert`]
//! outputs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Raw label used for noise when an assignment is flattened to integers.
pub const NOISE_LABEL: i64 = -1;

/// Free-form per-record attributes, carried through the pipeline untouched.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A single geolocated, timestamped accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentRecord {
    /// Latitude (WGS84), in `[-90, 90]`.
    pub latitude: f64,
    /// Longitude (WGS84), in `[-180, 180]`.
    pub longitude: f64,
    /// When the accident happened. Missing or unparsable source timestamps
    /// are normalized to the processing instant before analysis.
    pub timestamp: DateTime<Utc>,
    /// Every other source property, in source order.
    #[serde(default)]
    pub attributes: Attributes,
}

impl AccidentRecord {
    /// Creates a record with no extra attributes.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            attributes: Attributes::new(),
        }
    }

    /// Replaces the attribute bag.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether the position is finite and inside valid geographic ranges.
    #[must_use]
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Opaque cluster handle.
///
/// Raw values are assigned arbitrarily by the clustering traversal and carry
/// no meaning across runs, so the type exposes no arithmetic. New ids are
/// only minted through a [`ClusterIdAllocator`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(u32);

impl ClusterId {
    /// Wraps a raw id produced by a clustering run.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw value, for serialization only.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out fresh [`ClusterId`]s strictly above every id already in use.
#[derive(Debug, Clone)]
pub struct ClusterIdAllocator {
    next: u32,
}

impl ClusterIdAllocator {
    /// Returns the next unused id.
    pub const fn allocate(&mut self) -> ClusterId {
        let id = ClusterId(self.next);
        self.next += 1;
        id
    }
}

/// Cluster membership for every record, indexed by record position.
///
/// `None` is noise. This is the only mutable state shared between pipeline
/// stages; each stage takes it by `&mut` in turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<Option<ClusterId>>,
}

impl ClusterAssignment {
    /// Builds an assignment from per-record labels.
    #[must_use]
    pub const fn from_labels(labels: Vec<Option<ClusterId>>) -> Self {
        Self { labels }
    }

    /// Builds an assignment where every record is noise.
    #[must_use]
    pub fn all_noise(len: usize) -> Self {
        Self {
            labels: vec![None; len],
        }
    }

    /// Builds an assignment from raw integer labels; negative values are noise.
    #[must_use]
    pub fn from_raw(raw: &[i64]) -> Self {
        Self {
            labels: raw
                .iter()
                .map(|&label| u32::try_from(label).ok().map(ClusterId))
                .collect(),
        }
    }

    /// Number of records covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no records are covered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label of the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ClusterId> {
        self.labels.get(index).copied().flatten()
    }

    /// Relabels the record at `index`.
    pub fn set(&mut self, index: usize, label: Option<ClusterId>) {
        if let Some(slot) = self.labels.get_mut(index) {
            *slot = label;
        }
    }

    /// Labels flattened to integers, noise as [`NOISE_LABEL`].
    #[must_use]
    pub fn to_raw(&self) -> Vec<i64> {
        self.labels.iter().map(|label| raw_label(*label)).collect()
    }

    /// Distinct cluster ids in ascending order.
    #[must_use]
    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        self.labels
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Record indices per cluster, keyed in ascending id order.
    #[must_use]
    pub fn groups(&self) -> BTreeMap<ClusterId, Vec<usize>> {
        let mut groups: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
        for (index, label) in self.labels.iter().enumerate() {
            if let Some(id) = label {
                groups.entry(*id).or_default().push(index);
            }
        }
        groups
    }

    /// Record indices labelled as noise.
    #[must_use]
    pub fn noise_indices(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    /// Number of noise records.
    #[must_use]
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|label| label.is_none()).count()
    }

    /// Number of distinct clusters.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.cluster_ids().len()
    }

    /// An allocator whose first id is one above the current maximum.
    #[must_use]
    pub fn id_allocator(&self) -> ClusterIdAllocator {
        let next = self
            .labels
            .iter()
            .flatten()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(0);
        ClusterIdAllocator { next }
    }

    /// The membership partition with ids erased: each cluster's sorted
    /// member list, the clusters themselves sorted, plus the noise set.
    ///
    /// Two assignments that differ only by an id permutation produce equal
    /// partitions.
    #[must_use]
    pub fn partition(&self) -> (Vec<Vec<usize>>, Vec<usize>) {
        let mut clusters: Vec<Vec<usize>> = self.groups().into_values().collect();
        clusters.sort();
        (clusters, self.noise_indices())
    }
}

/// Flattens a label to an integer, noise as [`NOISE_LABEL`].
#[must_use]
pub fn raw_label(label: Option<ClusterId>) -> i64 {
    label.map_or(NOISE_LABEL, |id| i64::from(id.0))
}

/// Per-record values attached during clustering and published with the
/// clustered points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordAnnotation {
    /// Exponential recency weight.
    pub temporal_weight: f64,
    /// Trend slope of the record's spatial bin.
    pub trend_score: f64,
}

/// Final per-cluster statistics and geometry.
///
/// Derived from a settled [`ClusterAssignment`]; never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    /// Cluster handle.
    pub cluster_id: ClusterId,
    /// Arithmetic mean latitude of members.
    pub center_lat: f64,
    /// Arithmetic mean longitude of members.
    pub center_lon: f64,
    /// Member count.
    pub accident_count: usize,
    /// Composite danger score in `[0, 1]`.
    pub danger_score: f64,
    /// Members inside the recent-activity window.
    pub recent_accidents: usize,
    /// Mean temporal weight of members.
    pub avg_temporal_weight: f64,
    /// Mean trend value of members.
    pub avg_trend_score: f64,
    /// Latitude of the member nearest the mean.
    pub display_center_lat: f64,
    /// Longitude of the member nearest the mean.
    pub display_center_lon: f64,
    /// 95th percentile member distance from the display center, in meters.
    pub display_radius_m: f64,
    /// Distinct `barangay` values among members, in first-seen order.
    pub barangays: Vec<String>,
    /// Closed convex hull ring as `(lon, lat)` pairs, or the raw member
    /// positions when there are fewer than 3 members.
    #[serde(skip)]
    pub boundary: Vec<(f64, f64)>,
}

impl ClusterSummary {
    /// Whether [`Self::boundary`] is a drawable ring.
    #[must_use]
    pub const fn has_polygon(&self) -> bool {
        self.boundary.len() >= 3
    }
}

/// Alert severity tier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DangerLevel {
    /// Score below 0.4
    Low,
    /// Score in `[0.4, 0.7)`
    Medium,
    /// Score of 0.7 or more
    High,
}

impl DangerLevel {
    /// Tiers a danger score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Direction of a cluster's accident trend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrendDirection {
    /// Average trend above 0.1
    Increasing,
    /// Everything else
    Stable,
}

impl TrendDirection {
    /// Classifies an average trend value.
    #[must_use]
    pub fn from_trend(avg_trend: f64) -> Self {
        if avg_trend > 0.1 {
            Self::Increasing
        } else {
            Self::Stable
        }
    }
}

/// A notification-ready danger zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Cluster handle.
    pub cluster_id: ClusterId,
    /// Geofence center latitude.
    pub center_lat: f64,
    /// Geofence center longitude.
    pub center_lon: f64,
    /// Geofence radius.
    pub radius_km: f64,
    /// Severity tier.
    pub danger_level: DangerLevel,
    /// Composite danger score.
    pub danger_score: f64,
    /// Cluster member count.
    pub accident_count: usize,
    /// Members inside the recent-activity window.
    pub recent_accidents: usize,
    /// Trend classification.
    pub trend: TrendDirection,
    /// Human-readable message.
    pub alert_message: String,
}
