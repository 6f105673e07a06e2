//! Session transport traits
//!
//! The session manager and the collector only see the cluster through
//! these traits. Implementations handle sockets, pooling and the wire
//! protocol:
//! - `ConnectionPool`: bounded set of `RawConnection`s
//! - an in-memory cluster used by the tests

use serde_json::Value;

use crate::utils::{ProtocolError, Result, Term};

/// System database holding the cluster's statistics feed
pub const SYSTEM_DB: &str = "rethinkdb";

/// Statistics table inside the system database
pub const STATS_TABLE: &str = "stats";

/// Query execution trait
///
/// Methods take `&self` so a single executor can be shared by the
/// collector thread and the per-table count workers.
pub trait QueryExecutor {
    /// Run a query and return every document of its result
    fn run_query(&self, term: &Term) -> Result<Vec<Value>>;

    /// Run a query for its side effect only
    fn exec_statement(&self, term: &Term) -> Result<()> {
        self.run_query(term).map(|_| ())
    }
}

/// An established link to the cluster
pub trait Transport: QueryExecutor + Send + Sync {
    fn is_connected(&self) -> bool;

    /// Drop whatever sockets are held and open a fresh one
    fn reconnect(&self) -> Result<()>;

    fn close(&self);
}

/// Opens a `Transport` from configured addresses, credentials and TLS
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(&self) -> Result<Self::Transport>;
}

/// Queries the collector issues, built on top of `QueryExecutor`
pub trait ClusterQueries: QueryExecutor {
    /// `r.db("rethinkdb").table("stats")`
    fn stats(&self) -> Result<Vec<Value>> {
        self.run_query(&Term::db(SYSTEM_DB).table(STATS_TABLE))
    }

    /// Sum of the per-shard document estimates from `table.info()`.
    /// `None` when the table reports no estimates.
    fn table_doc_estimate(&self, db: &str, table: &str) -> Result<Option<f64>> {
        let info = self
            .run_query(&Term::db(db).table(table).info())?
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::InvalidFrame("empty table info response".to_string()))?;

        let estimates = info
            .get("doc_count_estimates")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProtocolError::InvalidFrame(format!(
                    "table info for {}.{} has no doc_count_estimates",
                    db, table
                ))
            })?;

        if estimates.is_empty() {
            return Ok(None);
        }

        let mut total = 0.0;
        for estimate in estimates {
            total += estimate.as_f64().ok_or_else(|| {
                ProtocolError::InvalidFrame(format!("non-numeric doc estimate {}", estimate))
            })?;
        }
        Ok(Some(total))
    }

    /// `table.count()`
    fn table_doc_count(&self, db: &str, table: &str) -> Result<f64> {
        let result = self.run_query(&Term::db(db).table(table).count())?;
        Ok(result.first().and_then(Value::as_f64).ok_or_else(|| {
            ProtocolError::InvalidFrame(format!("unexpected count result {:?}", result))
        })?)
    }
}

impl<T: QueryExecutor + ?Sized> ClusterQueries for T {}
