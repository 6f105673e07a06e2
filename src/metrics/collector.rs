//! Stat collector - turns one read of the statistics feed into samples
//!
//! The collector runs on its own thread and streams samples over a
//! rendezvous channel, so it never gets ahead of the consumer. Per-table
//! document counts run on a bounded pool of scoped worker threads feeding
//! the same channel. The pool is joined before the cluster totals and the
//! terminal `up` sample are sent, so those are always the last samples of
//! a cycle.

use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::stat_fields::{extract, ExtractedValue, Granularity, CACHE_PREFIX, DISK_PREFIX};
use super::stat_row::StatRow;
use crate::client::{ClusterQueries, QueryExecutor};
use crate::config::{CollectorConfig, DocCountMode};
use crate::utils::Result;

pub const UP: &str = "up";
pub const TABLE_DOCS_TOTAL: &str = "table_docs_total";
pub const SERVER_ERRORS_TOTAL: &str = "cluster_server_errors_total";
pub const SERVERS_TOTAL: &str = "cluster_servers_total";
pub const TABLES_TOTAL: &str = "cluster_tables_total";
pub const REPLICAS_TOTAL: &str = "cluster_replicas_total";

/// One named value with the labels it was observed under
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeSample {
    pub name: String,
    pub value: f64,
    pub server: String,
    pub db: String,
    pub table: String,
}

impl ScrapeSample {
    /// Cluster-wide sample without row labels
    pub fn unlabeled(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            server: String::new(),
            db: String::new(),
            table: String::new(),
        }
    }

    fn from_row(row: &StatRow, extracted: ExtractedValue) -> Self {
        Self {
            name: extracted.name,
            value: extracted.value,
            server: row.server.clone(),
            db: row.db.clone(),
            table: row.table.clone(),
        }
    }
}

/// Structural counters accumulated over the feed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ClusterCounts {
    server_errors: u64,
    servers: u64,
    tables: u64,
    replicas: u64,
}

impl ClusterCounts {
    fn samples(&self) -> [ScrapeSample; 4] {
        [
            ScrapeSample::unlabeled(SERVER_ERRORS_TOTAL, self.server_errors as f64),
            ScrapeSample::unlabeled(SERVERS_TOTAL, self.servers as f64),
            ScrapeSample::unlabeled(TABLES_TOTAL, self.tables as f64),
            ScrapeSample::unlabeled(REPLICAS_TOTAL, self.replicas as f64),
        ]
    }
}

/// Labels for one `table_docs_total` query
struct TableJob {
    server: String,
    db: String,
    table: String,
}

/// Runs statistics cycles
pub struct StatCollector {
    config: CollectorConfig,
}

impl StatCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Start one cycle and return its sample stream.
    ///
    /// The stream ends after the terminal `up` sample. It cannot be
    /// restarted; call `collect` again for the next cycle.
    pub fn collect<E>(&self, executor: Arc<E>) -> io::Result<Receiver<ScrapeSample>>
    where
        E: QueryExecutor + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        let config = self.config.clone();
        thread::Builder::new()
            .name("stat-collector".to_string())
            .spawn(move || run_cycle(&config, executor.as_ref(), &tx))?;
        Ok(rx)
    }
}

fn emit(tx: &SyncSender<ScrapeSample>, sample: ScrapeSample) {
    if tx.send(sample).is_err() {
        debug!("Sample consumer went away, dropping sample");
    }
}

fn run_cycle<E>(config: &CollectorConfig, executor: &E, tx: &SyncSender<ScrapeSample>)
where
    E: QueryExecutor + Sync,
{
    match collect_rows(config, executor, tx) {
        Ok(counts) => {
            for sample in counts.samples() {
                emit(tx, sample);
            }
            emit(tx, ScrapeSample::unlabeled(UP, 1.0));
        }
        Err(e) => {
            warn!("Scrape failed: {}", e);
            emit(tx, ScrapeSample::unlabeled(UP, 0.0));
        }
    }
}

fn collect_rows<E>(
    config: &CollectorConfig,
    executor: &E,
    tx: &SyncSender<ScrapeSample>,
) -> Result<ClusterCounts>
where
    E: QueryExecutor + Sync,
{
    let rows = executor.stats()?;
    debug!("Stats feed returned {} rows", rows.len());

    let counts = thread::scope(|scope| {
        let mut pool = CountPool::new(scope, executor, tx.clone(), config);
        let mut counts = ClusterCounts::default();

        for value in rows {
            let row = match StatRow::from_value(value) {
                Ok(row) => row,
                Err(e) => {
                    debug!("Undecodable stats row: {}", e);
                    counts.server_errors += 1;
                    continue;
                }
            };

            if row.has_error() {
                debug!("Stats row {:?} reports an error: {}", row.id, row.error);
                counts.server_errors += 1;
                continue;
            }

            let granularity = match row.granularity() {
                Some(granularity) => granularity,
                None => {
                    debug!("Stats row with unknown tag '{}'", row.prefix());
                    counts.server_errors += 1;
                    continue;
                }
            };

            if config.table_stats || !granularity.is_table_scoped() {
                for extracted in extract(granularity.as_str(), &row.query_engine) {
                    emit(tx, ScrapeSample::from_row(&row, extracted));
                }
            }

            match granularity {
                Granularity::Cluster => {}
                Granularity::Server => counts.servers += 1,
                Granularity::Table => {
                    counts.tables += 1;
                    if config.count_rows && config.table_stats {
                        pool.submit(TableJob {
                            server: row.server.clone(),
                            db: row.db.clone(),
                            table: row.table.clone(),
                        });
                    }
                }
                Granularity::TableServer => {
                    counts.replicas += 1;
                    if config.table_stats {
                        let storage = &row.storage_engine;
                        let samples = extract(CACHE_PREFIX, &storage.cache)
                            .into_iter()
                            .chain(extract(DISK_PREFIX, &storage.disk));
                        for extracted in samples {
                            emit(tx, ScrapeSample::from_row(&row, extracted));
                        }
                    }
                }
            }
        }

        // Closing the queue lets the workers exit; the scope joins them
        drop(pool);
        counts
    });

    Ok(counts)
}

/// Bounded pool of scoped workers running `table_docs_total` queries.
/// Workers are spawned on demand up to `limit`.
struct CountPool<'scope, 'env, E> {
    scope: &'scope thread::Scope<'scope, 'env>,
    executor: &'env E,
    samples: SyncSender<ScrapeSample>,
    mode: DocCountMode,
    jobs: mpsc::Sender<TableJob>,
    queue: Arc<Mutex<Receiver<TableJob>>>,
    workers: usize,
    limit: usize,
}

impl<'scope, 'env, E> CountPool<'scope, 'env, E>
where
    E: QueryExecutor + Sync,
{
    fn new(
        scope: &'scope thread::Scope<'scope, 'env>,
        executor: &'env E,
        samples: SyncSender<ScrapeSample>,
        config: &CollectorConfig,
    ) -> Self {
        let (jobs, queue) = mpsc::channel();
        Self {
            scope,
            executor,
            samples,
            mode: config.count_mode,
            jobs,
            queue: Arc::new(Mutex::new(queue)),
            workers: 0,
            limit: config.count_concurrency.max(1),
        }
    }

    fn submit(&mut self, job: TableJob) {
        if self.workers < self.limit {
            match self.spawn_worker() {
                Ok(()) => self.workers += 1,
                Err(e) => warn!("Failed to spawn table count worker: {}", e),
            }
        }

        if self.workers == 0 {
            count_table(self.mode, self.executor, job, &self.samples);
            return;
        }
        if let Err(mpsc::SendError(job)) = self.jobs.send(job) {
            count_table(self.mode, self.executor, job, &self.samples);
        }
    }

    fn spawn_worker(&self) -> io::Result<()> {
        let queue = Arc::clone(&self.queue);
        let samples = self.samples.clone();
        let executor = self.executor;
        let mode = self.mode;

        thread::Builder::new()
            .name(format!("table-count-{}", self.workers))
            .spawn_scoped(self.scope, move || loop {
                // The guard is dropped before the job runs; only idle workers contend
                let job = queue.lock().recv();
                match job {
                    Ok(job) => count_table(mode, executor, job, &samples),
                    Err(_) => break,
                }
            })?;
        Ok(())
    }
}

fn count_table<E>(mode: DocCountMode, executor: &E, job: TableJob, samples: &SyncSender<ScrapeSample>)
where
    E: QueryExecutor + ?Sized,
{
    let result = match mode {
        DocCountMode::Estimate => executor.table_doc_estimate(&job.db, &job.table),
        DocCountMode::Exact => executor.table_doc_count(&job.db, &job.table).map(Some),
    };

    match result {
        Ok(Some(value)) => emit(
            samples,
            ScrapeSample {
                name: TABLE_DOCS_TOTAL.to_string(),
                value,
                server: job.server,
                db: job.db,
                table: job.table,
            },
        ),
        Ok(None) => debug!("Table {}.{} reports no document estimates", job.db, job.table),
        Err(e) => warn!(
            "Failed to count documents in {}.{}: {}",
            job.db, job.table, e
        ),
    }
}
