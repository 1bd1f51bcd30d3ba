//! CLI entry point for the GTFS-RT vehicle tracker.
//!
//! Provides subcommands for running the capture daemon, importing a stop
//! catalog, exporting captured data, and inspecting a database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use gtfs_rt_tracker::config::Config;
use gtfs_rt_tracker::daemon;
use gtfs_rt_tracker::export::{export_csv, print_stats};
use gtfs_rt_tracker::stops::load_stops_csv;
use gtfs_rt_tracker::store::{SqliteStore, Store};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_tracker")]
#[command(about = "Capture GTFS-RT vehicle positions and derive stop visits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture daemon in the foreground
    Start {
        /// URL of a GTFS-realtime Vehicle Positions feed
        #[arg(short = 't', long)]
        feed_url: Option<String>,

        /// Path to the SQLite database
        #[arg(long = "db")]
        db_path: Option<String>,

        /// (OPTIONAL) URL to GET on each heartbeat to notify a monitor
        #[arg(long)]
        heartbeat_url: Option<String>,
    },
    /// Import a GTFS stops.txt catalog into the database
    LoadStops {
        /// Path to the SQLite database
        #[arg(long = "db")]
        db_path: Option<String>,

        /// Path to a GTFS stops.txt file
        stops: String,
    },
    /// Export stored locations between two POSIX timestamps to CSV
    Export {
        /// Path to the SQLite database
        #[arg(long = "db")]
        db_path: Option<String>,

        /// Destination CSV file
        dest: String,

        /// Lower POSIX timestamp bound (inclusive)
        min: i64,

        /// Upper POSIX timestamp bound (inclusive)
        max: i64,
    },
    /// Print entry counts and timestamp bounds for a database
    Stats {
        /// Path to the SQLite database
        #[arg(long = "db")]
        db_path: Option<String>,
    },
}

fn resolve_db_path(db_path: Option<String>) -> Result<String> {
    db_path
        .or_else(|| std::env::var("TRACKER_DB_PATH").ok())
        .ok_or_else(|| anyhow::anyhow!("no database path; pass --db or set TRACKER_DB_PATH"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            feed_url,
            db_path,
            heartbeat_url,
        } => {
            let config = Config::resolve(feed_url, db_path, heartbeat_url)?;
            daemon::start(config).await?;
        }
        Commands::LoadStops { db_path, stops } => {
            let store = SqliteStore::open(resolve_db_path(db_path)?)?;
            let catalog = load_stops_csv(&stops)?;
            store.put_stops(&catalog).await?;
            info!(count = catalog.len(), source = %stops, "stop catalog imported");
        }
        Commands::Export {
            db_path,
            dest,
            min,
            max,
        } => {
            let store = SqliteStore::open(resolve_db_path(db_path)?)?;
            let written = export_csv(&store, &dest, min, max).await?;
            info!(written, dest = %dest, "export complete");
        }
        Commands::Stats { db_path } => {
            let store = SqliteStore::open(resolve_db_path(db_path)?)?;
            print_stats(&store)?;
        }
    }

    Ok(())
}
