//! `GeoJSON` accident loading.
//!
//! Only `Point` features are read. Every property is kept as a record
//! attribute. The timestamp comes from `datecommitted` (joined with
//! `timecommitted` when present) or else `date`; records without a usable
//! timestamp are dated at the processing instant.

use std::path::Path;

use accident_map_accident_models::{AccidentRecord, Attributes};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use geojson::GeoJson;

use crate::IoError;

const DATE_FIELD: &str = "datecommitted";
const TIME_FIELD: &str = "timecommitted";
const FALLBACK_DATE_FIELD: &str = "date";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M:%S %p",
    "%Y-%m-%d %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parses a timestamp string. Offsets are honoured; naive values are taken
/// as UTC and bare dates as midnight UTC.
#[must_use]
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .map(|naive| naive.and_utc())
}

fn string_property<'a>(properties: &'a Attributes, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(serde_json::Value::as_str)
}

/// Timestamp of a feature from its properties, if one can be parsed.
#[must_use]
pub fn parse_timestamp(properties: &Attributes) -> Option<DateTime<Utc>> {
    if let Some(date) = string_property(properties, DATE_FIELD) {
        let combined = string_property(properties, TIME_FIELD)
            .and_then(|time| parse_datetime(&format!("{} {}", date.trim(), time.trim())));
        return combined.or_else(|| parse_datetime(date));
    }
    string_property(properties, FALLBACK_DATE_FIELD).and_then(parse_datetime)
}

/// Parses a `GeoJSON` `FeatureCollection` into records.
///
/// Coordinates are not range-checked here; the pipeline drops invalid
/// positions.
///
/// # Errors
///
/// * [`IoError::GeoJson`] if `json` is not valid `GeoJSON`
/// * [`IoError::Format`] if it is not a `FeatureCollection`
pub fn parse_feature_collection(
    json: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AccidentRecord>, IoError> {
    let GeoJson::FeatureCollection(collection) = json.parse::<GeoJson>()? else {
        return Err(IoError::Format {
            message: "expected a GeoJSON FeatureCollection".to_string(),
        });
    };

    let total = collection.features.len();
    let mut skipped = 0_usize;
    let mut undated = 0_usize;
    let mut records = Vec::with_capacity(total);

    for feature in collection.features {
        let position = match feature.geometry.map(|g| g.value) {
            Some(geojson::Value::Point(coords)) if coords.len() >= 2 => (coords[1], coords[0]),
            _ => {
                skipped += 1;
                continue;
            }
        };

        let attributes = feature.properties.unwrap_or_default();
        let timestamp = parse_timestamp(&attributes).unwrap_or_else(|| {
            undated += 1;
            now
        });

        records.push(
            AccidentRecord::new(position.0, position.1, timestamp).with_attributes(attributes),
        );
    }

    log::info!(
        "Loaded {} accident records from {total} features",
        records.len()
    );
    if skipped > 0 {
        log::info!("Skipped {skipped} features without Point geometry");
    }
    if undated > 0 {
        log::warn!("{undated} records had no parsable date and were dated now");
    }

    Ok(records)
}

/// Reads and parses a `GeoJSON` file.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be read, otherwise as
/// [`parse_feature_collection`].
pub fn load_records(path: &Path, now: DateTime<Utc>) -> Result<Vec<AccidentRecord>, IoError> {
    log::info!("Loading accidents from {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    parse_feature_collection(&contents, now)
}
