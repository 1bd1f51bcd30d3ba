//! Per-batch location filter: keeps readings that represent a genuinely
//! new, plausible update for their vehicle.

use chrono::{DateTime, Duration, Utc};

use crate::history::FetchHistory;
use crate::model::VehicleLocation;

/// Returns the readings whose timestamp has changed since the last update
/// for that vehicle.
///
/// A reading is kept iff its timestamp differs from the previously
/// recorded one, is no more than one minute ahead of `now`, and it
/// carries a trip id (a reading without a trip can never be attributed to
/// a stop visit later). The last-seen table is updated for every reading
/// regardless of acceptance, so one corrupt future-dated sample can't
/// permanently block a vehicle.
pub fn filter_updated(
    readings: &[VehicleLocation],
    history: &mut FetchHistory,
    now: DateTime<Utc>,
) -> Vec<VehicleLocation> {
    let threshold = now + Duration::minutes(1);
    let mut updated = Vec::new();

    for reading in readings {
        let last = history.last_seen(&reading.vehicle_id);
        history.mark_seen(&reading.vehicle_id, reading.timestamp);

        if last == Some(reading.timestamp) || reading.timestamp > threshold {
            continue;
        }
        if reading.trip_id.is_empty() {
            continue;
        }

        updated.push(reading.clone());
    }

    updated
}
