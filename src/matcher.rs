//! Stop matcher: turns each vehicle's recorded position history into a
//! compact sequence of stop visits.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::model::{StopVisit, Vehicle, VehicleLocation};
use crate::store::Store;

/// Summary of one matching pass over the whole vehicle catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchOutcome {
    /// Vehicles in the catalog.
    pub vehicles: usize,
    /// Vehicles that had new positions to analyze.
    pub analyzed: usize,
    /// Stop visits emitted across all vehicles.
    pub visits: usize,
}

/// Runs one matching pass over every cataloged vehicle. Per-vehicle
/// failures are logged and skipped; they never abort the pass.
#[tracing::instrument(skip(store))]
pub async fn run_matching_pass(store: &Arc<dyn Store>, max_distance_m: f64) -> Result<MatchOutcome> {
    let vehicles = store.list_vehicles().await?;
    let mut outcome = MatchOutcome {
        vehicles: vehicles.len(),
        ..Default::default()
    };

    for vehicle in &vehicles {
        match match_vehicle(store.as_ref(), vehicle, max_distance_m).await {
            Ok(Some(visits)) => {
                outcome.analyzed += 1;
                outcome.visits += visits;
            }
            Ok(None) => {
                debug!(vehicle_id = %vehicle.vehicle_id, "no new positions to analyze");
            }
            Err(e) => {
                error!(vehicle_id = %vehicle.vehicle_id, error = %e, "stop matching failed");
            }
        }
    }

    info!(
        vehicles = outcome.vehicles,
        analyzed = outcome.analyzed,
        visits = outcome.visits,
        "matching pass complete"
    );
    Ok(outcome)
}

/// Matches one vehicle's positions since its watermark against the stop
/// catalog. Returns the number of visits emitted, or `None` when there
/// was nothing to analyze (the watermark stays put in that case).
///
/// The watermark only advances once the emitted visits have been
/// persisted; a failed batch insert leaves it untouched so the pass is
/// retried in full next time.
pub async fn match_vehicle(
    store: &dyn Store,
    vehicle: &Vehicle,
    max_distance_m: f64,
) -> Result<Option<usize>> {
    // Taken before the read: anything that arrives while this pass runs
    // lands at or after the new watermark and is picked up next pass.
    let pass_started = Utc::now();

    let positions = store
        .locations_for_vehicle(&vehicle.vehicle_id, vehicle.last_analyzed)
        .await?;
    if positions.is_empty() {
        return Ok(None);
    }

    debug!(
        vehicle_id = %vehicle.vehicle_id,
        positions = positions.len(),
        since = %vehicle.last_analyzed,
        "analyzing position history"
    );

    let visits = collect_visits(store, vehicle, &positions, max_distance_m).await;
    if !visits.is_empty() {
        store.put_stop_visits(&visits).await?;
    }

    let mut updated = vehicle.clone();
    updated.last_analyzed = pass_started;
    if let Some(last) = positions.last() {
        updated.trip_id = last.trip_id.clone();
    }
    store.update_vehicle(&updated).await?;

    Ok(Some(visits.len()))
}

/// Walks the positions in time order and emits one visit per contiguous
/// run at a stop. A nearest-stop query failure skips only that position.
async fn collect_visits(
    store: &dyn Store,
    vehicle: &Vehicle,
    positions: &[VehicleLocation],
    max_distance_m: f64,
) -> Vec<StopVisit> {
    let mut visits: Vec<StopVisit> = Vec::new();

    for position in positions {
        let nearest = match store
            .nearest_stop(position.latitude, position.longitude, max_distance_m)
            .await
        {
            Ok(nearest) => nearest,
            Err(e) => {
                warn!(
                    vehicle_id = %vehicle.vehicle_id,
                    timestamp = %position.timestamp,
                    error = %e,
                    "nearest-stop query failed"
                );
                continue;
            }
        };
        let Some((stop, _distance)) = nearest else {
            continue;
        };

        let candidate = StopVisit {
            vehicle_id: vehicle.vehicle_id.clone(),
            route: position.route_id.clone(),
            trip_id: position.trip_id.clone(),
            stop_id: stop.stop_id,
            direction_id: position.direction_id,
            timestamp: position.timestamp,
        };

        // A contiguous run at one stop collapses into a single visit
        // carrying the earliest timestamp seen for that run.
        match visits.last_mut() {
            Some(last) if last.stop_id == candidate.stop_id => {
                if candidate.timestamp < last.timestamp {
                    *last = candidate;
                }
            }
            _ => visits.push(candidate),
        }
    }

    visits
}
