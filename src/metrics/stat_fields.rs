//! Static field tables for statistics rows
//!
//! Each nested block of a stats row has a table of fields listing:
//! - The emitted field name
//! - The row granularities the field is meaningful for (scope)
//! - How to read the value, either a number or a nested group
//!
//! `extract` walks a table in declared order and produces one value per
//! field whose scope admits the prefix, named `<prefix>_<field>`.

use super::stat_row::{CacheStats, DiskStats, QueryEngineStats, SpaceUsage};

/// Granularity tag carried as the first element of a row's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// Whole cluster
    Cluster,
    /// One server
    Server,
    /// One table, summed over its replicas
    Table,
    /// One replica of a table on one server
    TableServer,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Cluster => "cluster",
            Granularity::Server => "server",
            Granularity::Table => "table",
            Granularity::TableServer => "table_server",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "cluster" => Some(Granularity::Cluster),
            "server" => Some(Granularity::Server),
            "table" => Some(Granularity::Table),
            "table_server" => Some(Granularity::TableServer),
            _ => None,
        }
    }

    /// Table and replica rows are gated by the table statistics switch
    pub fn is_table_scoped(&self) -> bool {
        matches!(self, Granularity::Table | Granularity::TableServer)
    }
}

/// Prefixes a field is emitted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    /// Every prefix
    All,
    /// Only the listed prefixes (exact, case-sensitive match)
    Only(&'static [&'static str]),
}

impl FieldScope {
    pub fn includes(&self, prefix: &str) -> bool {
        match self {
            FieldScope::All => true,
            FieldScope::Only(prefixes) if prefixes.is_empty() => true,
            FieldScope::Only(prefixes) => prefixes.contains(&prefix),
        }
    }
}

/// How a field's value is read from its record
pub enum FieldAccess<T: 'static> {
    /// Leaf numeric value
    Number(fn(&T) -> f64),
    /// Group of fields one level down, emitted under the same prefix
    Nested(fn(&T, &str) -> Vec<ExtractedValue>),
}

/// Definition of one field of a stats block
pub struct StatField<T: 'static> {
    pub name: &'static str,
    pub scope: FieldScope,
    pub access: FieldAccess<T>,
}

impl<T: 'static> StatField<T> {
    const fn number(name: &'static str, scope: FieldScope, read: fn(&T) -> f64) -> Self {
        Self {
            name,
            scope,
            access: FieldAccess::Number(read),
        }
    }

    const fn nested(name: &'static str, walk: fn(&T, &str) -> Vec<ExtractedValue>) -> Self {
        Self {
            name,
            scope: FieldScope::All,
            access: FieldAccess::Nested(walk),
        }
    }
}

/// One named value produced by `extract`
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedValue {
    pub name: String,
    pub value: f64,
}

/// A stats block with a static field table
pub trait StatRecord: Sized + 'static {
    fn stat_fields() -> &'static [StatField<Self>];
}

/// Walk `record`'s field table and emit every field admitted for `prefix`
pub fn extract<T: StatRecord>(prefix: &str, record: &T) -> Vec<ExtractedValue> {
    let mut values = Vec::new();
    for field in T::stat_fields() {
        if !field.scope.includes(prefix) {
            continue;
        }
        match field.access {
            FieldAccess::Number(read) => values.push(ExtractedValue {
                name: format!("{}_{}", prefix, field.name),
                value: read(record),
            }),
            FieldAccess::Nested(walk) => values.extend(walk(record, prefix)),
        }
    }
    values
}

/// Prefix for `storage_engine.cache` fields of replica rows
pub const CACHE_PREFIX: &str = "table_server_cache";

/// Prefix for `storage_engine.disk` fields of replica rows
pub const DISK_PREFIX: &str = "table_server_disk";

type QueryEngineField = StatField<QueryEngineStats>;
type CacheField = StatField<CacheStats>;
type DiskField = StatField<DiskStats>;
type SpaceUsageField = StatField<SpaceUsage>;

const CLUSTER_SERVER: FieldScope = FieldScope::Only(&["cluster", "server"]);

static QUERY_ENGINE_FIELDS: [QueryEngineField; 8] = [
    QueryEngineField::number("client_connections", CLUSTER_SERVER, |q| q.client_connections),
    QueryEngineField::number("clients_active", CLUSTER_SERVER, |q| q.clients_active),
    QueryEngineField::number("queries_per_sec", CLUSTER_SERVER, |q| q.queries_per_sec),
    QueryEngineField::number("queries_total", FieldScope::Only(&["server"]), |q| q.queries_total),
    QueryEngineField::number("read_docs_per_sec", FieldScope::All, |q| q.read_docs_per_sec),
    QueryEngineField::number(
        "read_docs_total",
        FieldScope::Only(&["server", "table_server"]),
        |q| q.read_docs_total,
    ),
    QueryEngineField::number("written_docs_per_sec", FieldScope::All, |q| q.written_docs_per_sec),
    QueryEngineField::number(
        "written_docs_total",
        FieldScope::Only(&["server", "table"]),
        |q| q.written_docs_total,
    ),
];

static CACHE_FIELDS: [CacheField; 1] = [CacheField::number(
    "in_use_bytes",
    FieldScope::All,
    |c| c.in_use_bytes,
)];

fn space_usage(disk: &DiskStats, prefix: &str) -> Vec<ExtractedValue> {
    extract(prefix, &disk.space_usage)
}

static DISK_FIELDS: [DiskField; 5] = [
    DiskField::number("read_bytes_per_sec", FieldScope::All, |d| d.read_bytes_per_sec),
    DiskField::number("read_bytes_total", FieldScope::All, |d| d.read_bytes_total),
    DiskField::number("written_bytes_per_sec", FieldScope::All, |d| d.written_bytes_per_sec),
    DiskField::number("written_bytes_total", FieldScope::All, |d| d.written_bytes_total),
    DiskField::nested("space_usage", space_usage),
];

static SPACE_USAGE_FIELDS: [SpaceUsageField; 4] = [
    SpaceUsageField::number("data_bytes", FieldScope::All, |s| s.data_bytes),
    SpaceUsageField::number("metadata_bytes", FieldScope::All, |s| s.metadata_bytes),
    SpaceUsageField::number("garbage_bytes", FieldScope::All, |s| s.garbage_bytes),
    SpaceUsageField::number("preallocated_bytes", FieldScope::All, |s| s.preallocated_bytes),
];

impl StatRecord for QueryEngineStats {
    fn stat_fields() -> &'static [StatField<Self>] {
        &QUERY_ENGINE_FIELDS
    }
}

impl StatRecord for CacheStats {
    fn stat_fields() -> &'static [StatField<Self>] {
        &CACHE_FIELDS
    }
}

impl StatRecord for DiskStats {
    fn stat_fields() -> &'static [StatField<Self>] {
        &DISK_FIELDS
    }
}

impl StatRecord for SpaceUsage {
    fn stat_fields() -> &'static [StatField<Self>] {
        &SPACE_USAGE_FIELDS
    }
}
