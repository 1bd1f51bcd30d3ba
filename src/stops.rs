//! GTFS stop catalog import.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::model::Stop;

/// One row of a GTFS `stops.txt`. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct StopRecord {
    stop_id: String,
    stop_name: String,
    stop_lat: f64,
    stop_lon: f64,
}

/// Reads a GTFS `stops.txt` CSV into [`Stop`] values.
pub fn load_stops_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Stop>> {
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("open stops file {}", path.as_ref().display()))?;

    let mut stops = Vec::new();
    for record in reader.deserialize() {
        let record: StopRecord = record?;
        stops.push(Stop {
            stop_id: record.stop_id,
            name: record.stop_name,
            latitude: record.stop_lat,
            longitude: record.stop_lon,
        });
    }
    Ok(stops)
}
