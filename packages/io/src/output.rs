//! Result files of an analysis run.
//!
//! * `accidents_clustered.geojson`: every record as an `accident_point`,
//!   plus a `cluster_center` point and, when drawable, a `cluster_hull`
//!   polygon per cluster
//! * `cluster_centers.json`: the cluster summaries, highest score first
//! * `mobile_alerts.json`: the alerts

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use accident_map_accident_models::{ClusterSummary, raw_label};
use accident_map_analysis::PipelineOutput;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use serde::Serialize;

use crate::IoError;

/// Clustered points, centers, and hulls.
pub const CLUSTERED_GEOJSON: &str = "accidents_clustered.geojson";
/// Cluster summaries.
pub const CLUSTER_CENTERS_JSON: &str = "cluster_centers.json";
/// Alerts.
pub const MOBILE_ALERTS_JSON: &str = "mobile_alerts.json";

/// Property naming the kind of each exported feature.
const FEATURE_KIND: &str = "type";

fn feature(value: geojson::Value, mut properties: JsonObject, kind: &str) -> Feature {
    properties.insert(FEATURE_KIND.to_string(), JsonValue::from(kind));
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn summary_properties(summary: &ClusterSummary) -> Result<JsonObject, IoError> {
    match serde_json::to_value(summary)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(IoError::Format {
            message: format!("cluster {} did not serialize to an object", summary.cluster_id),
        }),
    }
}

/// Builds the clustered `GeoJSON` collection.
///
/// # Errors
///
/// Returns [`IoError::Json`] if a summary cannot be serialized.
pub fn clustered_feature_collection(output: &PipelineOutput) -> Result<FeatureCollection, IoError> {
    let mut features = Vec::with_capacity(output.records.len() + 2 * output.summaries.len());

    for (index, record) in output.records.iter().enumerate() {
        let mut properties = record.attributes.clone();
        properties.insert(
            "cluster".to_string(),
            JsonValue::from(raw_label(output.assignment.get(index))),
        );
        let annotation = output.annotations[index];
        properties.insert(
            "temporal_weight".to_string(),
            JsonValue::from(annotation.temporal_weight),
        );
        properties.insert(
            "trend_score".to_string(),
            JsonValue::from(annotation.trend_score),
        );
        properties.insert(
            "date".to_string(),
            JsonValue::from(record.timestamp.to_rfc3339()),
        );
        features.push(feature(
            geojson::Value::Point(vec![record.longitude, record.latitude]),
            properties,
            "accident_point",
        ));
    }

    for summary in &output.summaries {
        features.push(feature(
            geojson::Value::Point(vec![summary.center_lon, summary.center_lat]),
            summary_properties(summary)?,
            "cluster_center",
        ));
    }

    for summary in output.summaries.iter().filter(|s| s.has_polygon()) {
        let ring: Vec<Vec<f64>> = summary
            .boundary
            .iter()
            .map(|&(lon, lat)| vec![lon, lat])
            .collect();
        let mut properties = JsonObject::new();
        properties.insert(
            "cluster_id".to_string(),
            JsonValue::from(summary.cluster_id.raw()),
        );
        features.push(feature(
            geojson::Value::Polygon(vec![ring]),
            properties,
            "cluster_hull",
        ));
    }

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Sibling path a result file is staged at before being renamed into place.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Result files staged next to their final paths.
#[derive(Default)]
struct StagedFiles {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedFiles {
    fn stage<T: Serialize + ?Sized>(&mut self, value: &T, path: PathBuf) -> Result<(), IoError> {
        let staging = staging_path(&path);
        let result = write_json(value, &staging);
        self.staged.push((staging, path));
        result
    }

    /// Renames every staged file over its final path.
    fn commit(mut self) -> Result<Vec<PathBuf>, IoError> {
        for (staging, path) in &self.staged {
            std::fs::rename(staging, path)?;
        }
        Ok(std::mem::take(&mut self.staged)
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for (staging, _) in &self.staged {
            if let Err(e) = std::fs::remove_file(staging) {
                log::debug!("Could not remove {}: {e}", staging.display());
            }
        }
    }
}

/// Writes every result file into `dir`, creating it if needed. The alerts
/// file is skipped when `include_alerts` is false.
///
/// Files are staged beside their final names and only renamed into place
/// once all of them have been written, so a failed export leaves any
/// previous results untouched.
///
/// Returns the paths written.
///
/// # Errors
///
/// Returns [`IoError::Io`] or [`IoError::Json`] if a file cannot be
/// written.
pub fn write_outputs(
    output: &PipelineOutput,
    dir: &Path,
    include_alerts: bool,
) -> Result<Vec<PathBuf>, IoError> {
    std::fs::create_dir_all(dir)?;
    let mut staged = StagedFiles::default();

    let collection = clustered_feature_collection(output)?;
    staged.stage(&collection, dir.join(CLUSTERED_GEOJSON))?;
    staged.stage(&output.summaries, dir.join(CLUSTER_CENTERS_JSON))?;
    if include_alerts {
        staged.stage(&output.alerts, dir.join(MOBILE_ALERTS_JSON))?;
    }

    let written = staged.commit()?;

    log::info!(
        "Exported {} features, {} cluster centers{} to {}",
        collection.features.len(),
        output.summaries.len(),
        if include_alerts {
            format!(" and {} mobile alerts", output.alerts.len())
        } else {
            String::new()
        },
        dir.display()
    );

    Ok(written)
}
