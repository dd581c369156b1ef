//! Analysis configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! decay_rate = 0.15
//! recent_window_days = 365
//! highway_cluster_threshold = 500
//! noise_reassign_radius_km = 0.5
//! alert_percentile = 20
//! alert_radius_km = 0.5
//!
//! [tuning]
//! cluster_sizes = [5, 10, 20, 30, 50]
//! epsilons = [0.000001, 0.000005, 0.00001, 0.00005]
//! sample_size = 2000
//! seed = 42
//!
//! [clustering]
//! min_cluster_size = 15
//! min_samples = 5
//! cluster_selection_epsilon = 0.0001
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// Top-level knobs for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Exponential decay rate per year of record age.
    pub decay_rate: f64,
    /// Width of the recent-activity window.
    pub recent_window_days: i64,
    /// Clusters with more members than this are sub-clustered.
    pub highway_cluster_threshold: usize,
    /// Noise records within this distance of a cluster centroid join it.
    pub noise_reassign_radius_km: f64,
    /// Alert on the top N percent of clusters by danger score.
    pub alert_percentile: u8,
    /// Geofence radius published with each alert.
    pub alert_radius_km: f64,
    /// Parameter grid for automatic tuning.
    pub tuning: TuningConfig,
    /// Parameters used when tuning is skipped.
    pub clustering: ClusteringParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.15,
            recent_window_days: 365,
            highway_cluster_threshold: 500,
            noise_reassign_radius_km: 0.5,
            alert_percentile: 20,
            alert_radius_km: 0.5,
            tuning: TuningConfig::default(),
            clustering: ClusteringParams::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if the document does not
    /// parse or fails [`Self::validate`].
    pub fn from_toml_str(toml_str: &str) -> Result<Self, AnalysisError> {
        let config: Self = toml::de::from_str(toml_str)
            .map_err(|e| AnalysisError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if the file cannot be read,
    /// does not parse, or fails validation.
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::invalid_config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks every field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.decay_rate.is_finite() || self.decay_rate < 0.0 {
            return Err(AnalysisError::invalid_config(format!(
                "decay_rate must be a non-negative number, got {}",
                self.decay_rate
            )));
        }
        if self.recent_window_days < 0 {
            return Err(AnalysisError::invalid_config(format!(
                "recent_window_days must be >= 0, got {}",
                self.recent_window_days
            )));
        }
        if !(self.noise_reassign_radius_km.is_finite() && self.noise_reassign_radius_km > 0.0) {
            return Err(AnalysisError::invalid_config(format!(
                "noise_reassign_radius_km must be > 0, got {}",
                self.noise_reassign_radius_km
            )));
        }
        if self.alert_percentile > 100 {
            return Err(AnalysisError::invalid_config(format!(
                "alert_percentile must be within 0..=100, got {}",
                self.alert_percentile
            )));
        }
        if !(self.alert_radius_km.is_finite() && self.alert_radius_km > 0.0) {
            return Err(AnalysisError::invalid_config(format!(
                "alert_radius_km must be > 0, got {}",
                self.alert_radius_km
            )));
        }
        self.tuning.validate()?;
        self.clustering.validate()
    }
}

/// Grid explored by the parameter tuner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Candidate `min_cluster_size` values.
    pub cluster_sizes: Vec<usize>,
    /// Candidate selection epsilons, in radians of arc.
    pub epsilons: Vec<f64>,
    /// Maximum records sampled for the silhouette score.
    pub sample_size: usize,
    /// Base seed for silhouette sampling; each grid cell offsets it by its
    /// index.
    pub seed: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            cluster_sizes: vec![5, 10, 20, 30, 50],
            epsilons: vec![0.000_001, 0.000_005, 0.000_01, 0.000_05],
            sample_size: 2000,
            seed: 42,
        }
    }
}

impl TuningConfig {
    fn validate(&self) -> Result<(), AnalysisError> {
        if self.cluster_sizes.is_empty() || self.epsilons.is_empty() {
            return Err(AnalysisError::invalid_config(
                "tuning grid must have at least one cluster size and one epsilon",
            ));
        }
        if let Some(size) = self.cluster_sizes.iter().find(|size| **size < 2) {
            return Err(AnalysisError::invalid_config(format!(
                "tuning cluster sizes must be >= 2, got {size}"
            )));
        }
        if let Some(eps) = self
            .epsilons
            .iter()
            .find(|eps| !eps.is_finite() || **eps < 0.0)
        {
            return Err(AnalysisError::invalid_config(format!(
                "tuning epsilons must be non-negative, got {eps}"
            )));
        }
        if self.sample_size < 2 {
            return Err(AnalysisError::invalid_config(format!(
                "tuning sample_size must be >= 2, got {}",
                self.sample_size
            )));
        }
        Ok(())
    }

    /// Every `(min_cluster_size, epsilon)` pair, sizes outermost.
    #[must_use]
    pub fn grid(&self) -> Vec<(usize, f64)> {
        self.cluster_sizes
            .iter()
            .flat_map(|&size| self.epsilons.iter().map(move |&eps| (size, eps)))
            .collect()
    }
}

/// Parameters for one density clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    /// Smallest group that counts as a cluster.
    pub min_cluster_size: usize,
    /// Neighbourhood size used for core distances.
    pub min_samples: usize,
    /// Clusters born closer than this are merged upward.
    pub cluster_selection_epsilon: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 15,
            min_samples: 5,
            cluster_selection_epsilon: 0.0001,
        }
    }
}

impl ClusteringParams {
    /// Parameters for a tuned `min_cluster_size`, deriving
    /// `min_samples = max(2, min_cluster_size / 2)`.
    #[must_use]
    pub fn from_cluster_size(min_cluster_size: usize, cluster_selection_epsilon: f64) -> Self {
        Self {
            min_cluster_size,
            min_samples: (min_cluster_size / 2).max(2),
            cluster_selection_epsilon,
        }
    }

    /// Checks the parameters can drive a clustering run.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if `min_cluster_size < 2`,
    /// `min_samples < 1`, or the epsilon is negative or not finite.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.min_cluster_size < 2 {
            return Err(AnalysisError::invalid_config(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples < 1 {
            return Err(AnalysisError::invalid_config(format!(
                "min_samples must be >= 1, got {}",
                self.min_samples
            )));
        }
        if !self.cluster_selection_epsilon.is_finite() || self.cluster_selection_epsilon < 0.0 {
            return Err(AnalysisError::invalid_config(format!(
                "cluster_selection_epsilon must be non-negative, got {}",
                self.cluster_selection_epsilon
            )));
        }
        Ok(())
    }
}
