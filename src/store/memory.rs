//! In-memory [`Store`] mirroring the embedded store's persisted layout:
//! a `vehicle_locations` namespace holding one map per trip id, keyed by
//! stringified POSIX timestamp and valued by the JSON-serialized reading.
//!
//! Used by the test suite; has no durability.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::model::{Stop, StopVisit, Vehicle, VehicleLocation};
use crate::store::index::StopIndex;
use crate::store::Store;

#[derive(Default)]
struct Inner {
    /// trip id -> POSIX timestamp key -> serialized reading.
    locations: BTreeMap<String, BTreeMap<String, String>>,
    vehicles: BTreeMap<String, Vehicle>,
    visits: Vec<StopVisit>,
    stops: StopIndex,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored location entries across all trips.
    pub fn location_count(&self) -> usize {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.locations.values().map(|trip| trip.len()).sum()
    }

    /// Snapshot of all stop visits appended so far.
    pub fn stop_visits(&self) -> Vec<StopVisit> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.visits.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_location(&self, location: &VehicleLocation) -> Result<()> {
        let encoded = location.to_json()?;
        let key = location.timestamp.timestamp().to_string();
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .locations
            .entry(location.trip_id.clone())
            .or_default()
            .insert(key, encoded);
        Ok(())
    }

    async fn locations_for_vehicle(
        &self,
        vehicle_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut out = Vec::new();
        for trip in inner.locations.values() {
            for raw in trip.values() {
                let loc = VehicleLocation::from_json(raw)?;
                if loc.vehicle_id == vehicle_id && loc.timestamp >= since {
                    out.push(loc);
                }
            }
        }
        out.sort_by_key(|l| l.timestamp);
        Ok(out)
    }

    async fn locations_between(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut out = Vec::new();
        for trip in inner.locations.values() {
            for raw in trip.values() {
                let loc = VehicleLocation::from_json(raw)?;
                if loc.timestamp >= min && loc.timestamp <= max {
                    out.push(loc);
                }
            }
        }
        out.sort_by_key(|l| l.timestamp);
        Ok(out)
    }

    async fn nearest_stop(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
    ) -> Result<Option<(Stop, f64)>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.stops.nearest(latitude, longitude, max_distance_m))
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.vehicles.values().cloned().collect())
    }

    async fn create_vehicle_if_missing(&self, location: &VehicleLocation) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if !inner.vehicles.contains_key(&location.vehicle_id) {
            let vehicle = Vehicle::from_location(location, Utc::now());
            inner.vehicles.insert(location.vehicle_id.clone(), vehicle);
        }
        Ok(())
    }

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .vehicles
            .insert(vehicle.vehicle_id.clone(), vehicle.clone());
        Ok(())
    }

    async fn put_stop_visits(&self, visits: &[StopVisit]) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.visits.extend_from_slice(visits);
        Ok(())
    }

    async fn put_stops(&self, stops: &[Stop]) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.stops = StopIndex::build(stops);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn location(vehicle_id: &str, trip_id: &str, ts: i64) -> VehicleLocation {
        VehicleLocation {
            vehicle_id: vehicle_id.to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            route_id: "801".to_string(),
            trip_id: trip_id.to_string(),
            speed: None,
            latitude: 30.2672,
            longitude: -97.7431,
            bearing: None,
            direction_id: None,
        }
    }

    #[tokio::test]
    async fn test_put_location_is_idempotent_per_key() {
        let store = MemoryStore::new();
        store.put_location(&location("5402", "t1", 100)).await.unwrap();
        store.put_location(&location("5402", "t1", 100)).await.unwrap();
        assert_eq!(store.location_count(), 1);
    }

    #[tokio::test]
    async fn test_locations_for_vehicle_sorted_and_bounded() {
        let store = MemoryStore::new();
        store.put_location(&location("5402", "t1", 300)).await.unwrap();
        store.put_location(&location("5402", "t1", 100)).await.unwrap();
        store.put_location(&location("5402", "t2", 200)).await.unwrap();
        store.put_location(&location("9999", "t3", 250)).await.unwrap();

        let since = Utc.timestamp_opt(150, 0).unwrap();
        let locations = store.locations_for_vehicle("5402", since).await.unwrap();
        let times: Vec<i64> = locations.iter().map(|l| l.timestamp.timestamp()).collect();
        assert_eq!(times, vec![200, 300]);
    }

    #[tokio::test]
    async fn test_create_vehicle_if_missing_only_creates_once() {
        let store = MemoryStore::new();
        let loc = location("5402", "t1", 100);
        store.create_vehicle_if_missing(&loc).await.unwrap();

        let before = store.list_vehicles().await.unwrap();
        assert_eq!(before.len(), 1);

        let mut later = location("5402", "t9", 200);
        later.route_id = "999".to_string();
        store.create_vehicle_if_missing(&later).await.unwrap();

        let after = store.list_vehicles().await.unwrap();
        assert_eq!(after.len(), 1);
        // Existing entry untouched.
        assert_eq!(after[0].route_id, "801");
    }
}
