//! Daemon wiring: opens the store, builds the task set, and runs it
//! until a shutdown signal.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::capture;
use crate::config::Config;
use crate::fetch::BasicClient;
use crate::history::FetchHistory;
use crate::matcher;
use crate::store::{SqliteStore, Store};
use crate::task::{run_tasks, AdaptiveIntervalTask, FixedIntervalTask, RepeatTask};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the capture daemon in the foreground until Ctrl-C.
///
/// Only store-open and client-construction failures here are fatal;
/// every steady-state error is logged by the task that hit it.
pub async fn start(config: Config) -> Result<()> {
    let store = SqliteStore::open(&config.db_path).context("open store")?;
    let store: Arc<dyn Store> = Arc::new(store);
    let history = Arc::new(Mutex::new(FetchHistory::new()));
    let client = Arc::new(BasicClient::new(FETCH_TIMEOUT)?);

    info!(
        feed_url = %config.feed_url,
        db_path = %config.db_path,
        heartbeat = config.heartbeat_url.is_some(),
        "starting capture daemon"
    );

    let mut tasks: Vec<Box<dyn RepeatTask>> = Vec::new();

    let capture_job = {
        let client = Arc::clone(&client);
        let store = Arc::clone(&store);
        let history = Arc::clone(&history);
        let feed_url = config.feed_url.clone();
        move || {
            let client = Arc::clone(&client);
            let store = Arc::clone(&store);
            let history = Arc::clone(&history);
            let feed_url = feed_url.clone();
            async move {
                let outcome =
                    capture::run_capture(client.as_ref(), &feed_url, &store, &history).await?;
                info!(
                    total = outcome.total,
                    accepted = outcome.accepted,
                    routes = outcome.routes,
                    "capture tick"
                );
                anyhow::Ok(())
            }
        }
    };
    tasks.push(Box::new(AdaptiveIntervalTask::new(
        "capture",
        capture_job,
        Arc::clone(&history),
        config.normal_interval,
        config.extended_interval,
        config.dormant_after,
    )));

    let matcher_job = {
        let store = Arc::clone(&store);
        let max_distance = config.max_stop_distance_m;
        move || {
            let store = Arc::clone(&store);
            async move {
                matcher::run_matching_pass(&store, max_distance).await?;
                anyhow::Ok(())
            }
        }
    };
    tasks.push(Box::new(FixedIntervalTask::new(
        "stop-matcher",
        config.matching_interval,
        matcher_job,
    )));

    if let Some(url) = config.heartbeat_url.clone() {
        let heartbeat_client = reqwest::Client::builder()
            .timeout(HEARTBEAT_TIMEOUT)
            .build()?;
        let heartbeat_job = move || {
            let client = heartbeat_client.clone();
            let url = url.clone();
            async move { notify_monitor(&client, &url).await }
        };
        tasks.push(Box::new(FixedIntervalTask::new(
            "heartbeat",
            config.heartbeat_interval,
            heartbeat_job,
        )));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    run_tasks(tasks, shutdown_rx).await;
    info!("all tasks stopped");
    Ok(())
}

/// Pings the external liveness monitor. Failures are the caller's to
/// log; they never affect the capture cadence.
async fn notify_monitor(client: &reqwest::Client, url: &str) -> Result<()> {
    client.get(url).send().await?.error_for_status()?;
    Ok(())
}
