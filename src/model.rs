//! Domain types shared by the capture pipeline, the stop matcher, and the
//! store.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry sample for a vehicle, as decoded from the feed.
///
/// Accepted samples are persisted verbatim (JSON) under their trip id and
/// POSIX timestamp, so the serialized form doubles as the storage format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub route_id: String,
    pub trip_id: String,
    pub speed: Option<f32>,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<f32>,
    pub direction_id: Option<u32>,
}

impl VehicleLocation {
    /// Serializes the location into its persisted JSON form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a location from its persisted JSON form.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Catalog entry for a vehicle, carrying the analysis watermark.
///
/// `last_analyzed` marks how far the stop matcher has progressed through
/// this vehicle's position history. Entries are created the first time a
/// vehicle id shows up in stored locations and only the matcher moves the
/// watermark afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    /// Human-readable route label. The GTFS-RT feed only carries route
    /// ids, so this starts out equal to `route_id`.
    pub route: String,
    pub route_id: String,
    /// Most recently seen trip id for this vehicle.
    pub trip_id: String,
    pub last_analyzed: DateTime<Utc>,
}

impl Vehicle {
    /// Builds a fresh catalog entry from the first stored location of a
    /// vehicle. Analysis starts at creation time, not at the beginning of
    /// history.
    pub fn from_location(loc: &VehicleLocation, now: DateTime<Utc>) -> Self {
        Vehicle {
            vehicle_id: loc.vehicle_id.clone(),
            route: loc.route_id.clone(),
            route_id: loc.route_id.clone(),
            trip_id: loc.trip_id.clone(),
            last_analyzed: now,
        }
    }
}

/// Derived fact: a vehicle passed within the distance threshold of a stop
/// at a point in time. Append-only once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopVisit {
    pub vehicle_id: String,
    pub route: String,
    pub trip_id: String,
    pub stop_id: String,
    pub direction_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// A transit stop from the static GTFS catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}
