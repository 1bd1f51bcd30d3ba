pub mod capture;
pub mod config;
pub mod daemon;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod history;
pub mod matcher;
pub mod model;
pub mod parser;
pub mod stops;
pub mod store;
pub mod task;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
