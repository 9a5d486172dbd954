//! Construction-time configuration.

use std::{collections::BTreeMap, sync::Arc};

use axum::extract::Request;
use serde::{Deserialize, Serialize};

use crate::metric::MetricDefinition;

pub(crate) const DEFAULT_METRICS_PATH: &str = "/metrics";
pub(crate) const DEFAULT_SUBSYSTEM: &str = "http";

/// Maps a request to the value of the `url` label.
///
/// The default returns the raw path unchanged. Substitute a function that
/// rewrites parameterized segments to their route template to bound label
/// cardinality, e.g. `/customer/alice` -> `/customer/{name}`.
pub type UrlLabelFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Static basic-auth credentials (username -> password) allowed to scrape the
/// exposition endpoint.
pub type Accounts = BTreeMap<String, String>;

/// Resolution of the recorded request duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    #[default]
    Seconds,
    Microseconds,
}

/// Configuration for [`Prometheus::new`](crate::Prometheus::new).
///
/// `Config::default()` gives the standard metrics under the `http` subsystem,
/// exposed at `/metrics` on the instrumented router.
#[derive(Clone)]
pub struct Config {
    /// Subsystem prefix for every registered metric name. Falls back to
    /// `http` when empty.
    pub subsystem: String,
    /// Extra metrics to register alongside the standard set.
    pub custom_metrics: Vec<MetricDefinition>,
    /// Static labels added to every counter and duration observation. Keys
    /// shadowing a standard label name are dropped with a warning.
    pub custom_labels: BTreeMap<String, String>,
    /// Skip reading request bodies when computing the request size; the
    /// declared `Content-Length` is used instead.
    pub disable_body_reading: bool,
    pub duration_unit: DurationUnit,
    /// Path serving the exposition endpoint.
    pub metrics_path: String,
    /// When set, the exposition endpoint is served from a dedicated listener
    /// on this address instead of the instrumented router.
    pub listen_address: Option<String>,
    /// Basic-auth credentials gating the exposition endpoint. `None` leaves
    /// it open.
    pub accounts: Option<Accounts>,
    /// Maps a request to the `url` label value.
    pub url_label: UrlLabelFn,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subsystem: String::new(),
            custom_metrics: Vec::new(),
            custom_labels: BTreeMap::new(),
            disable_body_reading: false,
            duration_unit: DurationUnit::default(),
            metrics_path: DEFAULT_METRICS_PATH.to_owned(),
            listen_address: None,
            accounts: None,
            url_label: Arc::new(|req| req.uri().path().to_owned()),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("subsystem", &self.subsystem)
            .field("custom_metrics", &self.custom_metrics)
            .field("custom_labels", &self.custom_labels)
            .field("disable_body_reading", &self.disable_body_reading)
            .field("duration_unit", &self.duration_unit)
            .field("metrics_path", &self.metrics_path)
            .field("listen_address", &self.listen_address)
            .field("accounts", &self.accounts.as_ref().map(|a| a.keys().collect::<Vec<_>>()))
            .finish_non_exhaustive()
    }
}
