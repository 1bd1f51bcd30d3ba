//! One capture tick: fetch the feed, decode it, and fan the readings out
//! per route through the filter and into the store.

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::fetch::{fetch_bytes, HttpClient};
use crate::filter::filter_updated;
use crate::history::FetchHistory;
use crate::model::VehicleLocation;
use crate::parser::{parse_feed, readings_from_feed};
use crate::store::Store;

/// What one tick saw and kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureOutcome {
    /// Readings decoded from the feed.
    pub total: usize,
    /// Readings that survived the filter and were handed to the store.
    pub accepted: usize,
    /// Routes present in this batch.
    pub routes: usize,
}

/// Fetches the feed once and processes the batch. A fetch or decode
/// failure aborts this tick only; the caller's schedule is unaffected.
#[tracing::instrument(skip(client, store, history))]
pub async fn run_capture<C: HttpClient>(
    client: &C,
    feed_url: &str,
    store: &Arc<dyn Store>,
    history: &Arc<Mutex<FetchHistory>>,
) -> Result<CaptureOutcome> {
    let bytes = fetch_bytes(client, feed_url).await?;
    process_batch(&bytes, store, history).await
}

/// Decodes a fetched feed and runs the filter/persist pipeline, one
/// concurrent unit per route, joined before returning.
pub async fn process_batch(
    bytes: &[u8],
    store: &Arc<dyn Store>,
    history: &Arc<Mutex<FetchHistory>>,
) -> Result<CaptureOutcome> {
    let feed = parse_feed(bytes)?;
    let readings = readings_from_feed(&feed);
    let total = readings.len();

    let by_route = group_by_route(readings);
    let routes = by_route.len();

    // Every route in the batch gets a staleness entry before any of the
    // per-route units report their outcome.
    {
        let mut history = history.lock().expect("fetch history lock poisoned");
        for route in by_route.keys() {
            history.prepare_stream(route);
        }
    }

    let mut units = JoinSet::new();
    for (route, batch) in by_route {
        let store = Arc::clone(store);
        let history = Arc::clone(history);
        units.spawn(async move { log_route_locations(route, batch, store, history).await });
    }

    let mut accepted = 0;
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(count) => accepted += count,
            Err(e) => error!(error = %e, "route capture unit panicked"),
        }
    }

    debug!(total, accepted, routes, "capture tick complete");
    Ok(CaptureOutcome {
        total,
        accepted,
        routes,
    })
}

fn group_by_route(readings: Vec<VehicleLocation>) -> HashMap<String, Vec<VehicleLocation>> {
    let mut by_route: HashMap<String, Vec<VehicleLocation>> = HashMap::new();
    for reading in readings {
        if reading.route_id.is_empty() {
            debug!(vehicle_id = %reading.vehicle_id, "reading without route id dropped");
            continue;
        }
        by_route.entry(reading.route_id.clone()).or_default().push(reading);
    }
    by_route
}

/// Filters one route's batch and persists the survivors, feeding the
/// outcome back into the staleness counters. Returns the accepted count.
async fn log_route_locations(
    route: String,
    batch: Vec<VehicleLocation>,
    store: Arc<dyn Store>,
    history: Arc<Mutex<FetchHistory>>,
) -> usize {
    let updated = {
        let mut history = history.lock().expect("fetch history lock poisoned");
        let updated = filter_updated(&batch, &mut history, Utc::now());
        history.record_outcome(&route, !updated.is_empty());
        updated
    };

    if updated.is_empty() {
        debug!(route, "no new vehicle positions");
        return 0;
    }

    // One store write per reading, in flight together; a failed write is
    // logged and must not take its siblings down with it.
    let writes = updated.iter().map(|location| {
        let store = Arc::clone(&store);
        async move {
            if let Err(e) = store.put_location(location).await {
                warn!(
                    route = %location.route_id,
                    vehicle_id = %location.vehicle_id,
                    error = %e,
                    "failed to store location"
                );
                return;
            }
            if let Err(e) = store.create_vehicle_if_missing(location).await {
                warn!(vehicle_id = %location.vehicle_id, error = %e, "failed to register vehicle");
            }
        }
    });
    join_all(writes).await;

    debug!(route, count = updated.len(), "logged vehicle positions");
    updated.len()
}
