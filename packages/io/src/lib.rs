#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! File boundary of the danger-zone analysis.
//!
//! [`input`] turns a `GeoJSON` `FeatureCollection` of accident points into
//! [`AccidentRecord`](accident_map_accident_models::AccidentRecord)s;
//! [`output`] writes the clustered points, cluster summaries, and alerts
//! produced by a pipeline run.

pub mod input;
pub mod output;

pub use input::{load_records, parse_feature_collection};
pub use output::write_outputs;

/// Errors reading input or writing results.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The input is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The input is valid `GeoJSON` but not in the expected shape.
    #[error("Unexpected input format: {message}")]
    Format {
        /// Description of what went wrong.
        message: String,
    },
}
