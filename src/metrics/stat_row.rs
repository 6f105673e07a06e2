//! Rows of the `rethinkdb.stats` system table
//!
//! Every numeric field defaults to 0 when it is absent or null, so a row
//! with a partially populated block still yields its full set of samples.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::stat_fields::Granularity;

fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// `query_engine` block, present on every granularity
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryEngineStats {
    #[serde(deserialize_with = "number")]
    pub client_connections: f64,
    #[serde(deserialize_with = "number")]
    pub clients_active: f64,
    #[serde(deserialize_with = "number")]
    pub queries_per_sec: f64,
    #[serde(deserialize_with = "number")]
    pub queries_total: f64,
    #[serde(deserialize_with = "number")]
    pub read_docs_per_sec: f64,
    #[serde(deserialize_with = "number")]
    pub read_docs_total: f64,
    #[serde(deserialize_with = "number")]
    pub written_docs_per_sec: f64,
    #[serde(deserialize_with = "number")]
    pub written_docs_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheStats {
    #[serde(deserialize_with = "number")]
    pub in_use_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpaceUsage {
    #[serde(deserialize_with = "number")]
    pub data_bytes: f64,
    #[serde(deserialize_with = "number")]
    pub metadata_bytes: f64,
    #[serde(deserialize_with = "number")]
    pub garbage_bytes: f64,
    #[serde(deserialize_with = "number")]
    pub preallocated_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiskStats {
    #[serde(deserialize_with = "number")]
    pub read_bytes_per_sec: f64,
    #[serde(deserialize_with = "number")]
    pub read_bytes_total: f64,
    #[serde(deserialize_with = "number")]
    pub written_bytes_per_sec: f64,
    #[serde(deserialize_with = "number")]
    pub written_bytes_total: f64,
    pub space_usage: SpaceUsage,
}

/// `storage_engine` block, only meaningful on `table_server` rows
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageEngineStats {
    pub cache: CacheStats,
    pub disk: DiskStats,
}

/// One record of the statistics feed
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatRow {
    /// Granularity tag followed by the uuids identifying the row
    pub id: Vec<String>,
    pub query_engine: QueryEngineStats,
    pub storage_engine: StorageEngineStats,
    pub server: String,
    pub db: String,
    pub table: String,
    /// Set when the server could not report; voids the rest of the row
    pub error: String,
}

impl StatRow {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The raw tag, `""` when the id is empty
    pub fn prefix(&self) -> &str {
        self.id.first().map(String::as_str).unwrap_or("")
    }

    pub fn granularity(&self) -> Option<Granularity> {
        Granularity::parse(self.prefix())
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}
