//! Metrics collection and exposition
//!
//! This module provides:
//! - Decoding of `rethinkdb.stats` rows
//! - Static field tables and the scoped extractor
//! - The per-cycle stat collector with its bounded count pool
//! - The per-cycle metric registry and the scrape driver

pub mod collector;
pub mod exporter;
pub mod registry;
pub mod stat_fields;
pub mod stat_row;

pub use collector::{ScrapeSample, StatCollector};
pub use exporter::Exporter;
pub use registry::{CyclePhase, CycleSummary, MetricRegistry};
pub use stat_fields::{extract, ExtractedValue, FieldScope, Granularity, StatField, StatRecord};
pub use stat_row::StatRow;
