//! Command-line argument parsing
//!
//! Flag names follow the dotted convention used by Prometheus exporters
//! (`--db.addr`, `--web.listen-address`, ...).

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Prometheus exporter for RethinkDB cluster statistics
#[derive(Parser, Debug, Clone)]
#[command(name = "rethinkdb-exporter")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Connection Options =====
    /// Address of one or more nodes of the cluster, comma separated
    #[arg(long = "db.addr", default_value = "localhost:28015")]
    pub addr: String,

    /// Auth key of the RethinkDB cluster (used as the admin password)
    #[arg(long = "db.auth", default_value = "")]
    pub auth_key: String,

    /// Auth user for 2.3+ RethinkDB cluster
    #[arg(long = "db.user", default_value = "")]
    pub username: String,

    /// Auth pass for 2.3+ RethinkDB cluster
    #[arg(long = "db.pass", default_value = "")]
    pub password: String,

    /// Maximum number of open connections to the cluster
    #[arg(long = "db.max-open", default_value_t = 20)]
    pub max_open: usize,

    /// TCP connect timeout per address in milliseconds
    #[arg(long = "db.connect-timeout-ms", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Socket timeout for queries in milliseconds (0 = wait forever)
    #[arg(long = "db.query-timeout-ms", default_value_t = 0)]
    pub query_timeout_ms: u64,

    // ===== TLS Options =====
    /// Enable tls for connection to db
    #[arg(long = "db.tls.enable")]
    pub tls: bool,

    /// CA file for certificate
    #[arg(long = "db.tls.ca")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Certificate for TLS connection
    #[arg(long = "db.tls.cert")]
    pub tls_cert: Option<PathBuf>,

    /// Key file for certificate
    #[arg(long = "db.tls.key")]
    pub tls_key: Option<PathBuf>,

    /// Skip TLS certificate verification (insecure)
    #[arg(long = "db.tls.skip-verify")]
    pub tls_skip_verify: bool,

    // ===== Collection =====
    /// Count rows per table, turn off if you experience perf. issues with large tables
    #[arg(long = "db.count-rows", default_value_t = true, action = ArgAction::Set)]
    pub count_rows: bool,

    /// Run an exact count() per table instead of reading the shard estimates
    #[arg(long = "db.count-exact")]
    pub count_exact: bool,

    /// Maximum number of per-table count queries in flight
    #[arg(long = "db.count-concurrency", default_value_t = 8)]
    pub count_concurrency: usize,

    /// Get stats for all tables
    #[arg(long = "table-stats", default_value_t = true, action = ArgAction::Set)]
    pub table_stats: bool,

    // ===== Exposition =====
    /// Cluster Name, added as label to metrics
    #[arg(long = "clustername", default_value = "")]
    pub cluster_name: String,

    /// Namespace for metrics
    #[arg(long = "namespace", default_value = "rethinkdb")]
    pub namespace: String,

    /// Address to listen on for web interface and telemetry
    #[arg(long = "web.listen-address", default_value = ":9123")]
    pub listen_address: String,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub metrics_path: String,

    // ===== Logging =====
    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.addr.trim().is_empty() {
            return Err(
                "need parameter --db.addr with len > 0 to connect to RethinkDB cluster".to_string(),
            );
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err("--db.tls.cert and --db.tls.key must both be specified".to_string());
        }

        if self.max_open == 0 {
            return Err("--db.max-open must be at least 1".to_string());
        }

        if self.connect_timeout_ms == 0 {
            return Err("--db.connect-timeout-ms must be at least 1".to_string());
        }

        if self.count_concurrency == 0 {
            return Err("--db.count-concurrency must be at least 1".to_string());
        }

        if !self.metrics_path.starts_with('/') {
            return Err("--web.telemetry-path must start with '/'".to_string());
        }

        Ok(())
    }
}
