//! Metric registry rebuilt on every scrape
//!
//! Gauges only live for one cycle: `begin_cycle` drops the previous
//! generation, `absorb` recreates gauges from the sample stream and
//! `export` hands them to the encoder. A table or server that disappears
//! from the cluster therefore disappears from the next exposition.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tracing::warn;

use super::collector::{ScrapeSample, UP};
use crate::utils::{ExporterError, Result};

/// Where the registry is in the scrape cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Collecting,
    Exporting,
}

/// What one `absorb` call consumed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleSummary {
    pub samples: usize,
    /// Samples dropped because their label shape did not match
    pub rejected: usize,
    /// Value of the terminal `up` sample, if one arrived
    pub up: Option<f64>,
}

impl CycleSummary {
    pub fn is_up(&self) -> bool {
        self.up == Some(1.0)
    }
}

struct LabeledGauge {
    label_keys: Vec<&'static str>,
    vec: GaugeVec,
}

pub struct MetricRegistry {
    namespace: String,
    cluster_name: String,
    gauges: BTreeMap<String, LabeledGauge>,
    phase: CyclePhase,
}

impl MetricRegistry {
    pub fn new(namespace: &str, cluster_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            cluster_name: cluster_name.to_string(),
            gauges: BTreeMap::new(),
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Number of distinct metric names in the current generation
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Drop the previous generation of gauges
    pub fn begin_cycle(&mut self) {
        self.gauges.clear();
        self.phase = CyclePhase::Collecting;
    }

    /// Consume samples until the stream ends.
    ///
    /// A rejected sample never stops the drain, so producers blocked on
    /// the stream always get to finish.
    pub fn absorb<I>(&mut self, samples: I) -> CycleSummary
    where
        I: IntoIterator<Item = ScrapeSample>,
    {
        let mut summary = CycleSummary::default();
        for sample in samples {
            summary.samples += 1;
            if sample.name == UP {
                summary.up = Some(sample.value);
            }
            if let Err(e) = self.record(&sample) {
                warn!("Dropping sample: {}", e);
                summary.rejected += 1;
            }
        }
        self.phase = CyclePhase::Exporting;
        summary
    }

    /// Collect the current generation for encoding
    pub fn export(&mut self) -> Vec<MetricFamily> {
        let families = self
            .gauges
            .values()
            .flat_map(|gauge| gauge.vec.collect())
            .collect();
        self.phase = CyclePhase::Idle;
        families
    }

    fn record(&mut self, sample: &ScrapeSample) -> Result<()> {
        let labels = labels_for(&self.cluster_name, sample);
        let keys: Vec<&'static str> = labels.iter().map(|(key, _)| *key).collect();
        let values: Vec<&str> = labels.iter().map(|(_, value)| *value).collect();

        let gauge = match self.gauges.entry(sample.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let opts = Opts::new(
                    sample.name.as_str(),
                    format!("RethinkDB statistic {}", sample.name),
                )
                .namespace(self.namespace.as_str());
                let vec = GaugeVec::new(opts, &keys)?;
                entry.insert(LabeledGauge {
                    label_keys: keys.clone(),
                    vec,
                })
            }
        };

        if gauge.label_keys != keys {
            return Err(ExporterError::LabelShape {
                metric: sample.name.clone(),
                expected: gauge.label_keys.join(","),
                actual: keys.join(","),
            });
        }

        gauge.vec.get_metric_with_label_values(&values)?.set(sample.value);
        Ok(())
    }
}

/// Labels in fixed order, only those with a value
fn labels_for<'a>(cluster_name: &'a str, sample: &'a ScrapeSample) -> Vec<(&'static str, &'a str)> {
    [
        ("cluster", cluster_name),
        ("server", sample.server.as_str()),
        ("db", sample.db.as_str()),
        ("table", sample.table.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}
