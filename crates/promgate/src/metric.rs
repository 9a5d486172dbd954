//! Metric definitions and collector construction.

use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
};
use serde::{Deserialize, Serialize};

pub(crate) const REQ_CNT_ID: &str = "req_cnt";
pub(crate) const REQ_DUR_ID: &str = "req_dur";
pub(crate) const REQ_SZ_ID: &str = "req_sz";
pub(crate) const RES_SZ_ID: &str = "res_sz";

/// Label names owned by the standard metrics. Custom label names may not
/// shadow these.
pub(crate) const RESERVED_LABELS: [&str; 5] = ["code", "method", "handler", "host", "url"];

/// The kind of collector a [`MetricDefinition`] produces.
///
/// Kinds are spelled in configuration with their snake_case identifier:
/// `counter`, `counter_vec`, `gauge`, `gauge_vec`, `histogram`,
/// `histogram_vec`, `summary`, `summary_vec`.
///
/// The Rust prometheus client implements no quantile summaries, so the two
/// summary kinds build histogram collectors with the default buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    CounterVec,
    Gauge,
    GaugeVec,
    Histogram,
    HistogramVec,
    Summary,
    SummaryVec,
}

impl MetricKind {
    /// Whether collectors of this kind are partitioned by labels.
    pub fn is_vec(self) -> bool {
        matches!(
            self,
            Self::CounterVec | Self::GaugeVec | Self::HistogramVec | Self::SummaryVec
        )
    }
}

/// Declares one metric to register: exposition name, help text, kind and, for
/// vector kinds, the ordered label names. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Unique identifier used to look the live collector up after registration.
    pub id: String,
    /// Exposition name. The configured subsystem is prepended on registration.
    pub name: String,
    /// Help text emitted on the `# HELP` line.
    pub help: String,
    pub kind: MetricKind,
    /// Label names for vector kinds; empty otherwise.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl MetricDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            help: help.into(),
            kind,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Build the live collector for this definition under `subsystem`.
    pub(crate) fn build(&self, subsystem: &str) -> Result<Collector, prometheus::Error> {
        let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        let opts = Opts::new(&self.name, &self.help).subsystem(subsystem);
        let hist_opts = HistogramOpts::new(&self.name, &self.help).subsystem(subsystem);
        let collector = match self.kind {
            MetricKind::Counter => Collector::Counter(IntCounter::with_opts(opts)?),
            MetricKind::CounterVec => Collector::CounterVec(IntCounterVec::new(opts, &labels)?),
            MetricKind::Gauge => Collector::Gauge(Gauge::with_opts(opts)?),
            MetricKind::GaugeVec => Collector::GaugeVec(GaugeVec::new(opts, &labels)?),
            MetricKind::Histogram | MetricKind::Summary => {
                Collector::Histogram(Histogram::with_opts(hist_opts)?)
            },
            MetricKind::HistogramVec | MetricKind::SummaryVec => {
                Collector::HistogramVec(HistogramVec::new(hist_opts, &labels)?)
            },
        };
        Ok(collector)
    }
}

/// A live collector bound to one [`MetricDefinition`].
///
/// Clones share the underlying series, so a handle obtained once at startup
/// keeps recording into the registered collector.
#[derive(Debug, Clone)]
pub enum Collector {
    Counter(IntCounter),
    CounterVec(IntCounterVec),
    Gauge(Gauge),
    GaugeVec(GaugeVec),
    Histogram(Histogram),
    HistogramVec(HistogramVec),
}

impl Collector {
    pub fn as_counter(&self) -> Option<&IntCounter> {
        match self {
            Self::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_counter_vec(&self) -> Option<&IntCounterVec> {
        match self {
            Self::CounterVec(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_gauge(&self) -> Option<&Gauge> {
        match self {
            Self::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_gauge_vec(&self) -> Option<&GaugeVec> {
        match self {
            Self::GaugeVec(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            Self::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_histogram_vec(&self) -> Option<&HistogramVec> {
        match self {
            Self::HistogramVec(h) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn boxed(&self) -> Box<dyn prometheus::core::Collector> {
        match self {
            Self::Counter(c) => Box::new(c.clone()),
            Self::CounterVec(c) => Box::new(c.clone()),
            Self::Gauge(g) => Box::new(g.clone()),
            Self::GaugeVec(g) => Box::new(g.clone()),
            Self::Histogram(h) => Box::new(h.clone()),
            Self::HistogramVec(h) => Box::new(h.clone()),
        }
    }
}

/// The four standard metrics recorded for every instrumented request.
/// `custom_labels` are appended to the two vector metrics.
pub(crate) fn standard_metrics(custom_labels: &[String]) -> Vec<MetricDefinition> {
    let mut cnt_labels: Vec<String> = RESERVED_LABELS.iter().map(|l| (*l).to_owned()).collect();
    let mut dur_labels: Vec<String> = ["code", "method", "url"]
        .iter()
        .map(|l| (*l).to_owned())
        .collect();
    cnt_labels.extend(custom_labels.iter().cloned());
    dur_labels.extend(custom_labels.iter().cloned());

    vec![
        MetricDefinition::new(
            REQ_CNT_ID,
            "requests_total",
            "How many HTTP requests processed, partitioned by status code and HTTP method.",
            MetricKind::CounterVec,
        )
        .with_labels(cnt_labels),
        MetricDefinition::new(
            REQ_DUR_ID,
            "request_duration_seconds",
            "The HTTP request latencies in seconds.",
            MetricKind::HistogramVec,
        )
        .with_labels(dur_labels),
        MetricDefinition::new(
            REQ_SZ_ID,
            "request_size_bytes",
            "The HTTP request sizes in bytes.",
            MetricKind::Summary,
        ),
        MetricDefinition::new(
            RES_SZ_ID,
            "response_size_bytes",
            "The HTTP response sizes in bytes.",
            MetricKind::Summary,
        ),
    ]
}
