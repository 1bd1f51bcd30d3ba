//! Embedded [`Store`] backed by SQLite.
//!
//! Locations live in a `vehicle_locations` table keyed by
//! `(trip_id, ts)` with the JSON-serialized reading as the value, the
//! SQL rendering of the per-trip / POSIX-timestamp bucket layout. The
//! stop catalog is mirrored into an in-memory R-tree at open so
//! nearest-stop queries never touch the engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::model::{Stop, StopVisit, Vehicle, VehicleLocation};
use crate::store::index::StopIndex;
use crate::store::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vehicle_locations (
    trip_id    TEXT NOT NULL,
    ts         INTEGER NOT NULL,
    vehicle_id TEXT NOT NULL,
    data       TEXT NOT NULL,
    PRIMARY KEY (trip_id, ts)
);
CREATE INDEX IF NOT EXISTS idx_vehicle_locations_vehicle_ts
    ON vehicle_locations (vehicle_id, ts);
CREATE TABLE IF NOT EXISTS vehicles (
    vehicle_id    TEXT PRIMARY KEY,
    route         TEXT NOT NULL,
    route_id      TEXT NOT NULL,
    trip_id       TEXT NOT NULL,
    last_analyzed INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS stops (
    stop_id   TEXT PRIMARY KEY,
    name      TEXT NOT NULL,
    latitude  REAL NOT NULL,
    longitude REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS stop_visits (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id   TEXT NOT NULL,
    route        TEXT NOT NULL,
    trip_id      TEXT NOT NULL,
    stop_id      TEXT NOT NULL,
    direction_id INTEGER,
    ts           INTEGER NOT NULL
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    stops: RwLock<StopIndex>,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database at `path` and loads the
    /// stop catalog into the R-tree.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("open database at {}", path.as_ref().display()))?;
        conn.execute_batch(SCHEMA)?;

        let stops = load_stops(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            stops: RwLock::new(StopIndex::build(&stops)),
        })
    }

    /// Total number of stored location entries, with the smallest and
    /// largest timestamps present, if any.
    pub fn location_stats(&self) -> Result<(u64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let (count, min, max): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(ts), MAX(ts) FROM vehicle_locations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let to_time = |ts: Option<i64>| ts.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
        Ok((count as u64, to_time(min), to_time(max)))
    }
}

fn load_stops(conn: &Connection) -> Result<Vec<Stop>> {
    let mut stmt = conn.prepare("SELECT stop_id, name, latitude, longitude FROM stops")?;
    let rows = stmt.query_map([], |row| {
        Ok(Stop {
            stop_id: row.get(0)?,
            name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn vehicle_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Vehicle, i64)> {
    Ok((
        Vehicle {
            vehicle_id: row.get(0)?,
            route: row.get(1)?,
            route_id: row.get(2)?,
            trip_id: row.get(3)?,
            last_analyzed: DateTime::<Utc>::UNIX_EPOCH,
        },
        row.get(4)?,
    ))
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_location(&self, location: &VehicleLocation) -> Result<()> {
        let encoded = location.to_json()?;
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO vehicle_locations (trip_id, ts, vehicle_id, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                location.trip_id,
                location.timestamp.timestamp(),
                location.vehicle_id,
                encoded
            ],
        )?;
        Ok(())
    }

    async fn locations_for_vehicle(
        &self,
        vehicle_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT data FROM vehicle_locations
             WHERE vehicle_id = ?1 AND ts >= ?2 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![vehicle_id, since.timestamp()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(VehicleLocation::from_json(&raw?)?);
        }
        Ok(out)
    }

    async fn locations_between(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<VehicleLocation>> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT data FROM vehicle_locations
             WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![min.timestamp(), max.timestamp()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(VehicleLocation::from_json(&raw?)?);
        }
        Ok(out)
    }

    async fn nearest_stop(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
    ) -> Result<Option<(Stop, f64)>> {
        let index = self.stops.read().expect("stop index lock poisoned");
        Ok(index.nearest(latitude, longitude, max_distance_m))
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT vehicle_id, route, route_id, trip_id, last_analyzed FROM vehicles",
        )?;
        let rows = stmt.query_map([], vehicle_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            let (mut vehicle, ts) = row?;
            vehicle.last_analyzed = DateTime::<Utc>::from_timestamp(ts, 0)
                .context("corrupt last_analyzed timestamp")?;
            out.push(vehicle);
        }
        Ok(out)
    }

    async fn create_vehicle_if_missing(&self, location: &VehicleLocation) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let exists: Option<String> = conn
            .query_row(
                "SELECT vehicle_id FROM vehicles WHERE vehicle_id = ?1",
                params![location.vehicle_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(());
        }

        let vehicle = Vehicle::from_location(location, Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO vehicles (vehicle_id, route, route_id, trip_id, last_analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                vehicle.vehicle_id,
                vehicle.route,
                vehicle.route_id,
                vehicle.trip_id,
                vehicle.last_analyzed.timestamp()
            ],
        )?;
        Ok(())
    }

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO vehicles (vehicle_id, route, route_id, trip_id, last_analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                vehicle.vehicle_id,
                vehicle.route,
                vehicle.route_id,
                vehicle.trip_id,
                vehicle.last_analyzed.timestamp()
            ],
        )?;
        Ok(())
    }

    async fn put_stop_visits(&self, visits: &[StopVisit]) -> Result<()> {
        let mut conn = self.conn.lock().expect("sqlite lock poisoned");
        let tx = conn.transaction()?;
        for visit in visits {
            tx.execute(
                "INSERT INTO stop_visits (vehicle_id, route, trip_id, stop_id, direction_id, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    visit.vehicle_id,
                    visit.route,
                    visit.trip_id,
                    visit.stop_id,
                    visit.direction_id,
                    visit.timestamp.timestamp()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn put_stops(&self, stops: &[Stop]) -> Result<()> {
        {
            let mut conn = self.conn.lock().expect("sqlite lock poisoned");
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM stops", [])?;
            for stop in stops {
                tx.execute(
                    "INSERT INTO stops (stop_id, name, latitude, longitude)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![stop.stop_id, stop.name, stop.latitude, stop.longitude],
                )?;
            }
            tx.commit()?;
        }

        let mut index = self.stops.write().expect("stop index lock poisoned");
        *index = StopIndex::build(stops);
        Ok(())
    }
}
