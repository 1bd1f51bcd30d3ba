//! Daemon configuration: CLI arguments take precedence, then `TRACKER_*`
//! environment variables (a `.env` file is loaded at startup), then the
//! deployment defaults.

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the GTFS-realtime Vehicle Positions feed.
    pub feed_url: String,
    /// Path to the SQLite database.
    pub db_path: String,
    /// Monitor URL to GET on each heartbeat, if any.
    pub heartbeat_url: Option<String>,
    /// Poll interval while at least one route is producing updates.
    pub normal_interval: Duration,
    /// Poll interval once every route has gone dormant.
    pub extended_interval: Duration,
    /// Counted consecutive empty polls before a route is dormant.
    pub dormant_after: u32,
    /// Nearest-stop match threshold in meters.
    pub max_stop_distance_m: f64,
    /// Interval between stop-matching passes.
    pub matching_interval: Duration,
    /// Interval between heartbeat notifications.
    pub heartbeat_interval: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("parse {name}={raw}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Resolves the daemon configuration. `feed_url`, `db_path`, and
    /// `heartbeat_url` come from the CLI and fall back to
    /// `TRACKER_FEED_URL`, `TRACKER_DB_PATH`, and
    /// `TRACKER_HEARTBEAT_URL`.
    pub fn resolve(
        feed_url: Option<String>,
        db_path: Option<String>,
        heartbeat_url: Option<String>,
    ) -> Result<Self> {
        let Some(feed_url) = feed_url.or_else(|| std::env::var("TRACKER_FEED_URL").ok()) else {
            bail!("no feed URL; pass --feed-url or set TRACKER_FEED_URL");
        };
        let Some(db_path) = db_path.or_else(|| std::env::var("TRACKER_DB_PATH").ok()) else {
            bail!("no database path; pass --db or set TRACKER_DB_PATH");
        };
        let heartbeat_url = heartbeat_url.or_else(|| std::env::var("TRACKER_HEARTBEAT_URL").ok());

        Ok(Config {
            feed_url,
            db_path,
            heartbeat_url,
            normal_interval: Duration::from_secs(env_or("TRACKER_NORMAL_INTERVAL_SECS", 30)?),
            extended_interval: Duration::from_secs(env_or("TRACKER_EXTENDED_INTERVAL_SECS", 600)?),
            dormant_after: env_or("TRACKER_DORMANT_AFTER", 5)?,
            max_stop_distance_m: env_or("TRACKER_MAX_STOP_DISTANCE_M", 100.0)?,
            matching_interval: Duration::from_secs(env_or("TRACKER_MATCHING_INTERVAL_SECS", 900)?),
            heartbeat_interval: Duration::from_secs(env_or(
                "TRACKER_HEARTBEAT_INTERVAL_SECS",
                300,
            )?),
        })
    }
}
