//! Scrape cycle driver
//!
//! One `scrape` call holds the registry lock for the whole cycle:
//! begin, drain the collector's stream, export. Concurrent scrapes are
//! serialized on that lock, so two cycles never interleave.

use std::iter;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, IntCounter, Opts, TextEncoder};
use tracing::{debug, warn};

use super::collector::{ScrapeSample, StatCollector, UP};
use super::registry::MetricRegistry;
use crate::client::QueryExecutor;
use crate::utils::Result;

pub struct Exporter<E> {
    executor: Arc<E>,
    collector: StatCollector,
    registry: Mutex<MetricRegistry>,
    duration: Gauge,
    scrape_error: Gauge,
    total_scrapes: IntCounter,
}

impl<E> Exporter<E>
where
    E: QueryExecutor + Send + Sync + 'static,
{
    pub fn new(
        executor: Arc<E>,
        collector: StatCollector,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Self> {
        let duration = Gauge::with_opts(
            Opts::new(
                "exporter_last_scrape_duration_seconds",
                "The last scrape duration.",
            )
            .namespace(namespace),
        )?;
        let scrape_error = Gauge::with_opts(
            Opts::new("exporter_last_scrape_error", "The last scrape error status.")
                .namespace(namespace),
        )?;
        let total_scrapes = IntCounter::with_opts(
            Opts::new("exporter_scrapes_total", "Current total rethinkdb scrapes.")
                .namespace(namespace),
        )?;

        Ok(Self {
            executor,
            collector,
            registry: Mutex::new(MetricRegistry::new(namespace, cluster_name)),
            duration,
            scrape_error,
            total_scrapes,
        })
    }

    /// Run one full cycle and return every metric family to expose
    pub fn scrape(&self) -> Vec<MetricFamily> {
        let mut registry = self.registry.lock();
        let start = Instant::now();
        self.total_scrapes.inc();

        registry.begin_cycle();
        let summary = match self.collector.collect(Arc::clone(&self.executor)) {
            Ok(samples) => registry.absorb(samples),
            Err(e) => {
                warn!("Failed to start stat collector: {}", e);
                registry.absorb(iter::once(ScrapeSample::unlabeled(UP, 0.0)))
            }
        };

        self.scrape_error
            .set(if summary.is_up() { 0.0 } else { 1.0 });
        if summary.rejected > 0 {
            warn!(
                "{} of {} samples rejected for inconsistent labels",
                summary.rejected, summary.samples
            );
        }
        self.duration.set(start.elapsed().as_secs_f64());
        debug!(
            "Scrape finished: {} samples in {:.3}s",
            summary.samples,
            start.elapsed().as_secs_f64()
        );

        let mut families = Vec::new();
        families.extend(self.duration.collect());
        families.extend(self.total_scrapes.collect());
        families.extend(self.scrape_error.collect());
        families.extend(registry.export());
        families
    }

    /// Scrape and encode in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let families = self.scrape();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockCluster, MockConnector};
    use crate::client::LazySession;
    use crate::config::CollectorConfig;

    fn exporter_for(cluster: &Arc<MockCluster>) -> Exporter<LazySession<MockConnector>> {
        let session = LazySession::new(MockConnector::new(Arc::clone(cluster)));
        Exporter::new(
            Arc::new(session),
            StatCollector::new(CollectorConfig::default()),
            "rethinkdb",
            "",
        )
        .unwrap()
    }

    #[test]
    fn test_render_fixture() {
        let cluster = MockCluster::with_fixture();
        let text = exporter_for(&cluster).render().unwrap();

        assert!(text.contains("rethinkdb_cluster_servers_total 2"));
        assert!(text.contains("rethinkdb_cluster_tables_total 2"));
        assert!(text.contains("rethinkdb_table_docs_total{db=\"test\",table=\"test1\"} 4"));
        assert!(text.contains("rethinkdb_up 1"));
        assert!(text.contains("rethinkdb_exporter_scrapes_total 1"));
        assert!(text.contains("rethinkdb_exporter_last_scrape_error 0"));
        assert!(text.contains("# TYPE rethinkdb_server_queries_total gauge"));
    }

    #[test]
    fn test_dropped_table_disappears() {
        let cluster = MockCluster::with_fixture();
        let exporter = exporter_for(&cluster);

        let first = exporter.render().unwrap();
        assert!(first.contains("table=\"test1\""));

        cluster.drop_table("test1");
        let second = exporter.render().unwrap();
        assert!(!second.contains("table=\"test1\""));
        assert!(second.contains("rethinkdb_table_docs_total{db=\"test\",table=\"test2\"} 0"));
        assert!(second.contains("rethinkdb_cluster_tables_total 1"));
        assert!(second.contains("rethinkdb_exporter_scrapes_total 2"));
    }

    #[test]
    fn test_unreachable_cluster() {
        let exporter = Exporter::new(
            Arc::new(LazySession::new(MockConnector::unreachable())),
            StatCollector::new(CollectorConfig::default()),
            "rethinkdb",
            "prod",
        )
        .unwrap();

        let families = exporter.scrape();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(
            names,
            vec![
                "rethinkdb_exporter_last_scrape_duration_seconds",
                "rethinkdb_exporter_scrapes_total",
                "rethinkdb_exporter_last_scrape_error",
                "rethinkdb_up",
            ]
        );
        assert_eq!(families[2].get_metric()[0].get_gauge().get_value(), 1.0);
        assert_eq!(families[3].get_metric()[0].get_gauge().get_value(), 0.0);
    }

    #[test]
    fn test_scrape_error_resets_after_recovery() {
        let cluster = MockCluster::with_fixture();
        let exporter = exporter_for(&cluster);

        cluster.fail_stats(true);
        assert!(exporter
            .render()
            .unwrap()
            .contains("rethinkdb_exporter_last_scrape_error 1"));

        cluster.fail_stats(false);
        let text = exporter.render().unwrap();
        assert!(text.contains("rethinkdb_exporter_last_scrape_error 0"));
        assert!(text.contains("rethinkdb_up 1"));
    }

    #[test]
    fn test_concurrent_scrapes_serialize() {
        let cluster = MockCluster::with_fixture();
        let exporter = Arc::new(exporter_for(&cluster));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let exporter = Arc::clone(&exporter);
                std::thread::spawn(move || exporter.render().unwrap())
            })
            .collect();
        for handle in handles {
            let text = handle.join().unwrap();
            assert!(text.contains("rethinkdb_cluster_servers_total 2"));
            let up_lines = text
                .lines()
                .filter(|line| line.starts_with("rethinkdb_up "))
                .count();
            assert_eq!(up_lines, 1);
        }
        assert!(exporter.render().unwrap().contains("rethinkdb_exporter_scrapes_total 5"));
    }
}
