#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Danger-zone analysis for geolocated accident records.
//!
//! Turns a static snapshot of [`AccidentRecord`]s into ranked danger zones
//! in one batch pass:
//!
//! 1. [`tuner`] grid-searches density clustering parameters (optional).
//! 2. [`density`] clusters records under great-circle distance.
//! 3. [`split`] re-clusters oversized clusters in a spatio-temporal
//!    feature space.
//! 4. [`noise`] pulls noise records into a nearby cluster.
//! 5. [`geometry`] summarizes each final cluster, scoring it with
//!    [`scoring`].
//! 6. [`alerts`] turns the top-scoring summaries into alerts.
//!
//! [`pipeline::AnalysisPipeline`] drives the stages in that order and owns
//! the [`ClusterAssignment`](accident_map_accident_models::ClusterAssignment)
//! as it passes from stage to stage.
//!
//! [`AccidentRecord`]: accident_map_accident_models::AccidentRecord

pub mod alerts;
pub mod config;
pub mod density;
pub mod geometry;
pub mod noise;
pub mod pipeline;
pub mod progress;
pub mod scoring;
pub mod split;
pub mod stats;
pub mod temporal;
pub mod tuner;

pub use config::AnalysisConfig;
pub use pipeline::{AnalysisPipeline, PipelineOutput};

/// Errors that abort an analysis run.
///
/// Degenerate-but-recoverable situations (a tuning candidate without a
/// quality score, a cluster too small for a hull, a split that finds no
/// sub-structure) are not errors and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// No record survived geographic filtering.
    #[error("No valid accident records after geographic filtering")]
    NoValidRecords,

    /// Configuration is malformed or out of range.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of what went wrong.
        message: String,
    },

    /// The density clustering algorithm could not complete.
    #[error("Clustering failed: {message}")]
    Clustering {
        /// Description of what went wrong.
        message: String,
    },
}

impl AnalysisError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn clustering(message: impl Into<String>) -> Self {
        Self::Clustering {
            message: message.into(),
        }
    }
}
