//! rethinkdb-exporter library
//!
//! Prometheus exporter for RethinkDB cluster statistics.

pub mod client;
pub mod config;
pub mod metrics;
pub mod server;
pub mod utils;
