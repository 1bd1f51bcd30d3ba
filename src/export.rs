//! Offline tools over a captured database: CSV export of a time slice
//! and basic stats.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::store::{SqliteStore, Store};

/// Writes all stored locations with POSIX timestamps in `[min, max]` to
/// a CSV file. Returns the number of rows written.
pub async fn export_csv<P: AsRef<Path>>(
    store: &dyn Store,
    dest: P,
    min: i64,
    max: i64,
) -> Result<usize> {
    let min = DateTime::<Utc>::from_timestamp(min, 0).context("min timestamp out of range")?;
    let max = DateTime::<Utc>::from_timestamp(max, 0).context("max timestamp out of range")?;

    let locations = store.locations_between(min, max).await?;
    info!(
        count = locations.len(),
        dest = %dest.as_ref().display(),
        "writing vehicle locations"
    );

    let mut writer = csv::Writer::from_path(&dest)
        .with_context(|| format!("create {}", dest.as_ref().display()))?;
    writer.write_record([
        "vehicle_id",
        "timestamp",
        "speed",
        "route_id",
        "trip_id",
        "latitude",
        "longitude",
    ])?;

    for loc in &locations {
        writer.write_record([
            loc.vehicle_id.clone(),
            loc.timestamp.to_rfc3339(),
            loc.speed.map(|s| s.to_string()).unwrap_or_default(),
            loc.route_id.clone(),
            loc.trip_id.clone(),
            loc.latitude.to_string(),
            loc.longitude.to_string(),
        ])?;
    }
    writer.flush()?;

    Ok(locations.len())
}

/// Prints entry count and timestamp bounds for a captured database.
pub fn print_stats(store: &SqliteStore) -> Result<()> {
    let (count, min, max) = store.location_stats()?;
    println!("stored locations: {count}");
    match (min, max) {
        (Some(min), Some(max)) => {
            println!("smallest timestamp: {}", min.to_rfc3339());
            println!("largest timestamp:  {}", max.to_rfc3339());
        }
        _ => println!("no locations stored"),
    }
    Ok(())
}
