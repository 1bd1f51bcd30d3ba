//! Storage collaborator: an ordered location space plus the vehicle
//! catalog, stop catalog, and derived stop visits.
//!
//! The capture pipeline and the stop matcher only ever talk to the
//! [`Store`] trait. [`SqliteStore`] is the embedded store the daemon
//! runs against; [`MemoryStore`] mirrors the same persisted layout in
//! memory for tests.

mod index;
mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Stop, StopVisit, Vehicle, VehicleLocation};

/// Narrow interface over the storage engine.
///
/// `put_location` has at-least-once semantics: re-storing the same
/// `(trip_id, timestamp)` key overwrites the previous value.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persists one accepted reading under `(trip_id, timestamp)`.
    async fn put_location(&self, location: &VehicleLocation) -> Result<()>;

    /// All stored locations for one vehicle with `timestamp >= since`,
    /// ascending by time.
    async fn locations_for_vehicle(
        &self,
        vehicle_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>>;

    /// All stored locations with timestamps in `[min, max]`, across all
    /// trips.
    async fn locations_between(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>>;

    /// The closest catalog stop within `max_distance_m` meters of the
    /// point, with its distance, if any.
    async fn nearest_stop(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
    ) -> Result<Option<(Stop, f64)>>;

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>>;

    /// Adds a catalog entry for the reading's vehicle if none exists.
    /// Existing entries are left untouched; only the stop matcher mutates
    /// them.
    async fn create_vehicle_if_missing(&self, location: &VehicleLocation) -> Result<()>;

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<()>;

    /// Appends a batch of derived stop visits.
    async fn put_stop_visits(&self, visits: &[StopVisit]) -> Result<()>;

    /// Replaces the stop catalog used by nearest-stop lookups.
    async fn put_stops(&self, stops: &[Stop]) -> Result<()>;
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_distance(30.0, -97.0, 30.0, -97.0), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km.
        let d = haversine_distance(30.0, -97.0, 31.0, -97.0);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }
}
