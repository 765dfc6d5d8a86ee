//! Label-indexing proxy for prometheus metric vectors.
//!
//! A prometheus vector can only delete a series when given its complete
//! label set. The proxy remembers every label set it has handed out, keyed
//! by an MD5 digest, so callers can later remove all series that match a
//! partial label query (for example every series of one task, whatever its
//! other labels).

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, Opts,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A full label set, ordered by label name.
pub type LabelSet = BTreeMap<String, String>;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("expected {expected} label values, got {got}")]
    LabelCount { expected: usize, got: usize },

    #[error("unknown label name: {0}")]
    UnknownLabel(String),

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Operations the proxy needs from a labelled prometheus vector.
pub trait LabeledVec: Collector + Clone + 'static {
    type Metric;

    fn metric_for(&self, values: &[&str]) -> prometheus::Result<Self::Metric>;

    fn remove_series(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<()>;
}

macro_rules! impl_labeled_vec {
    ($($vec:ty => $metric:ty),* $(,)?) => {
        $(
            impl LabeledVec for $vec {
                type Metric = $metric;

                fn metric_for(&self, values: &[&str]) -> prometheus::Result<$metric> {
                    self.get_metric_with_label_values(values)
                }

                fn remove_series(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<()> {
                    self.remove(labels)
                }
            }
        )*
    };
}

impl_labeled_vec! {
    HistogramVec => Histogram,
    CounterVec => Counter,
    IntCounterVec => IntCounter,
    GaugeVec => Gauge,
    IntGaugeVec => IntGauge,
}

/// Wraps a metric vector and indexes every label set used through it.
pub struct MetricVecProxy<V> {
    inner: V,
    label_names: Vec<String>,
    labels: Mutex<HashMap<String, LabelSet>>,
}

pub type HistogramVecProxy = MetricVecProxy<HistogramVec>;
pub type CounterVecProxy = MetricVecProxy<CounterVec>;
pub type IntCounterVecProxy = MetricVecProxy<IntCounterVec>;
pub type GaugeVecProxy = MetricVecProxy<GaugeVec>;
pub type IntGaugeVecProxy = MetricVecProxy<IntGaugeVec>;

pub fn new_histogram_vec(opts: HistogramOpts, label_names: &[&str]) -> Result<HistogramVecProxy> {
    let inner = HistogramVec::new(opts, label_names)?;
    Ok(MetricVecProxy::new(inner, label_names))
}

pub fn new_counter_vec(opts: Opts, label_names: &[&str]) -> Result<CounterVecProxy> {
    let inner = CounterVec::new(opts, label_names)?;
    Ok(MetricVecProxy::new(inner, label_names))
}

pub fn new_int_counter_vec(opts: Opts, label_names: &[&str]) -> Result<IntCounterVecProxy> {
    let inner = IntCounterVec::new(opts, label_names)?;
    Ok(MetricVecProxy::new(inner, label_names))
}

pub fn new_gauge_vec(opts: Opts, label_names: &[&str]) -> Result<GaugeVecProxy> {
    let inner = GaugeVec::new(opts, label_names)?;
    Ok(MetricVecProxy::new(inner, label_names))
}

pub fn new_int_gauge_vec(opts: Opts, label_names: &[&str]) -> Result<IntGaugeVecProxy> {
    let inner = IntGaugeVec::new(opts, label_names)?;
    Ok(MetricVecProxy::new(inner, label_names))
}

impl<V: LabeledVec> MetricVecProxy<V> {
    /// `label_names` must be the variable labels `inner` was built with, in
    /// the same order.
    pub fn new(inner: V, label_names: &[&str]) -> Self {
        Self {
            inner,
            label_names: label_names.iter().map(|name| (*name).to_string()).collect(),
            labels: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped vector, e.g. for registering with a `prometheus::Registry`.
    pub fn inner(&self) -> &V {
        &self.inner
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Fetch (creating if needed) the series for positional label values.
    pub fn with_label_values(&self, values: &[&str]) -> Result<V::Metric> {
        if values.len() != self.label_names.len() {
            return Err(ProxyError::LabelCount {
                expected: self.label_names.len(),
                got: values.len(),
            });
        }
        let metric = self.inner.metric_for(values)?;
        let set = self
            .label_names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), (*value).to_string()))
            .collect();
        self.note_labels(set);
        Ok(metric)
    }

    /// Fetch (creating if needed) the series for a complete label map.
    pub fn with(&self, labels: &HashMap<&str, &str>) -> Result<V::Metric> {
        if labels.len() != self.label_names.len() {
            return Err(ProxyError::LabelCount {
                expected: self.label_names.len(),
                got: labels.len(),
            });
        }
        let mut values = Vec::with_capacity(self.label_names.len());
        for name in &self.label_names {
            let value = labels
                .get(name.as_str())
                .ok_or_else(|| ProxyError::UnknownLabel(name.clone()))?;
            values.push(*value);
        }
        self.with_label_values(&values)
    }

    /// Delete every registered series whose labels contain all the given
    /// key/value pairs. Returns true only if every matched deletion
    /// succeeded; an empty match is a success.
    pub fn delete_all_about_labels(&self, partial: &HashMap<&str, &str>) -> bool {
        let mut index = self.lock_labels();
        let matched: Vec<(String, LabelSet)> = index
            .iter()
            .filter(|(_, set)| matches_partial(set, partial))
            .map(|(digest, set)| (digest.clone(), set.clone()))
            .collect();

        let mut all_deleted = true;
        for (digest, set) in matched {
            let full: HashMap<&str, &str> = set
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            if let Err(err) = self.inner.remove_series(&full) {
                tracing::warn!(labels = ?set, error = %err, "failed to delete metric series");
                all_deleted = false;
            }
            index.remove(&digest);
        }
        all_deleted
    }

    /// Snapshot of the label sets currently indexed.
    pub fn labels(&self) -> Vec<LabelSet> {
        self.lock_labels().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_labels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_labels().is_empty()
    }

    fn note_labels(&self, set: LabelSet) {
        let digest = labels_digest(&set);
        self.lock_labels().entry(digest).or_insert(set);
    }

    fn lock_labels(&self) -> MutexGuard<'_, HashMap<String, LabelSet>> {
        self.labels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: LabeledVec> Collector for MetricVecProxy<V> {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.inner.collect()
    }
}

/// MD5 over `name=value` pairs in label-name order.
pub fn labels_digest(labels: &LabelSet) -> String {
    let mut buf = String::new();
    for (name, value) in labels {
        buf.push_str(name);
        buf.push('=');
        buf.push_str(value);
        buf.push('\n');
    }
    format!("{:x}", md5::compute(buf.as_bytes()))
}

fn matches_partial(set: &LabelSet, partial: &HashMap<&str, &str>) -> bool {
    partial
        .iter()
        .all(|(name, value)| set.get(*name).is_some_and(|v| v == value))
}
