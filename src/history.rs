//! Process-scoped fetch history: when each vehicle was last seen, and how
//! many consecutive polls came back empty for each route.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-route staleness state. A poll only counts toward dormancy if the
/// poll before it was also empty, so a single quiet poll between updates
/// never degrades a route.
#[derive(Debug, Default, Clone)]
struct StaleState {
    consecutive_empty: u32,
    previous_was_empty: bool,
}

/// History of vehicle location fetches.
///
/// `last_seen` grows for the lifetime of the process and is never
/// evicted; a few bytes per active vehicle buys O(1) staleness checks.
/// Both maps are mutated from concurrent per-route tasks within a tick,
/// so the whole struct lives behind a single `Mutex` in the daemon.
#[derive(Debug, Default)]
pub struct FetchHistory {
    last_seen: HashMap<String, DateTime<Utc>>,
    stale: HashMap<String, StaleState>,
}

impl FetchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last timestamp recorded for a vehicle, if any.
    pub fn last_seen(&self, vehicle_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(vehicle_id).copied()
    }

    /// Records the latest timestamp for a vehicle. Called for every
    /// reading in a batch, accepted or not, so a bad future-dated sample
    /// cannot wedge a vehicle (the next sane timestamp will differ from
    /// it and pass the filter).
    pub fn mark_seen(&mut self, vehicle_id: &str, timestamp: DateTime<Utc>) {
        self.last_seen.insert(vehicle_id.to_string(), timestamp);
    }

    /// Makes sure a route has a staleness entry before its batch is
    /// evaluated.
    pub fn prepare_stream(&mut self, route: &str) {
        self.stale.entry(route.to_string()).or_default();
    }

    /// Feeds the outcome of one poll for one route into the staleness
    /// counters.
    pub fn record_outcome(&mut self, route: &str, produced_any: bool) {
        let state = self.stale.entry(route.to_string()).or_default();
        if produced_any {
            state.consecutive_empty = 0;
            state.previous_was_empty = false;
        } else {
            if state.previous_was_empty {
                state.consecutive_empty += 1;
            }
            state.previous_was_empty = true;
        }
    }

    /// True iff every tracked route has seen at least `threshold` counted
    /// consecutive empty polls. Vacuously true with no tracked routes;
    /// callers that don't want that must check [`stream_count`] first.
    ///
    /// [`stream_count`]: FetchHistory::stream_count
    pub fn all_dormant(&self, threshold: u32) -> bool {
        self.stale
            .values()
            .all(|s| s.consecutive_empty >= threshold)
    }

    /// Number of routes currently tracked for staleness.
    pub fn stream_count(&self) -> usize {
        self.stale.len()
    }

    /// Zeroes every route's staleness counter. Done when the scheduler
    /// moves to the extended cadence so the next wake-up starts counting
    /// from scratch.
    pub fn reset_counters(&mut self) {
        for state in self.stale.values_mut() {
            state.consecutive_empty = 0;
            state.previous_was_empty = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn consecutive_empty(&self, route: &str) -> u32 {
        self.stale
            .get(route)
            .map(|s| s.consecutive_empty)
            .unwrap_or(0)
    }
}
