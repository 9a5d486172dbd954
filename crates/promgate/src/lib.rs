//! Prometheus instrumentation middleware for axum.
//!
//! Measures per-request metrics (count, latency, request/response sizes),
//! serves them in the Prometheus text exposition format, and can relay them
//! to a push gateway for environments without pull-based scraping.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use promgate::{Config, Prometheus};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let prom = Prometheus::new(Config::default())?;
//! let app = prom.instrument(Router::new().route("/", get(|| async { "ok" })));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Each [`Prometheus`] instance owns its own registry, so independent
//! instances (one per test, one per app) never share series.

mod config;
mod error;
mod exposition;
mod metric;
mod middleware;
mod push;
mod registry;

pub use {
    config::{Accounts, Config, DurationUnit, UrlLabelFn},
    error::Error,
    metric::{Collector, MetricDefinition, MetricKind},
    middleware::{UrlLabel, track},
    push::{PushGatewayConfig, PushHandle},
};

// Re-export the backend so callers can name collector types without adding
// their own dependency on a matching version.
pub use prometheus;

use std::{collections::HashMap, sync::Arc};

use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, warn};

use crate::{config::DEFAULT_SUBSYSTEM, middleware::RequestObservation};

/// The instrumentation instance: owns the registry and the collector handles
/// the middleware records into. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Prometheus {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub registry: Registry,
    pub collectors: registry::Collectors,
    pub custom_labels: std::collections::BTreeMap<String, String>,
    pub disable_body_reading: bool,
    pub duration_unit: DurationUnit,
    pub metrics_path: String,
    pub listen_address: Option<String>,
    pub accounts: Option<Accounts>,
    pub url_label: UrlLabelFn,
}

impl Prometheus {
    /// Build an instance with a fresh registry.
    ///
    /// Duplicate metric names are logged and skipped rather than failing
    /// construction; the only construction error is a custom definition
    /// shadowing one of the standard metrics with a different kind.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_registry(config, Registry::new())
    }

    /// Build an instance recording into an externally owned registry.
    pub fn with_registry(mut config: Config, registry: Registry) -> Result<Self, Error> {
        let subsystem = if config.subsystem.is_empty() {
            DEFAULT_SUBSYSTEM.to_owned()
        } else {
            config.subsystem.clone()
        };

        // Custom label names may not shadow the standard label set.
        for reserved in metric::RESERVED_LABELS {
            if config.custom_labels.remove(reserved).is_some() {
                warn!(label = reserved, "custom label shadows a standard label name, dropped");
            }
        }
        let custom_label_names: Vec<String> = config.custom_labels.keys().cloned().collect();

        // Custom definitions first, standard set appended, so a collision is
        // reported against the standard name.
        let mut defs = config.custom_metrics;
        defs.extend(metric::standard_metrics(&custom_label_names));
        let collectors = registry::Collectors::register(&registry, &subsystem, &defs)?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                collectors,
                custom_labels: config.custom_labels,
                disable_body_reading: config.disable_body_reading,
                duration_unit: config.duration_unit,
                metrics_path: config.metrics_path,
                listen_address: config.listen_address,
                accounts: config.accounts,
                url_label: config.url_label,
            }),
        })
    }

    /// The registry all collectors of this instance are registered in.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Path the exposition endpoint is served on.
    pub fn metrics_path(&self) -> &str {
        &self.inner.metrics_path
    }

    /// Look up a custom collector by the id of its definition.
    pub fn collector(&self, id: &str) -> Option<&Collector> {
        self.inner.collectors.by_id.get(id)
    }

    /// Render the current registry state in the text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.inner.registry.gather(), &mut buffer) {
            error!(%err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Attach the request hook and the exposition endpoint to `router`.
    ///
    /// Call this after all routes are registered; routes added afterwards are
    /// not instrumented. With a configured `listen_address` the exposition
    /// endpoint is served from its own listener (spawned here, so a tokio
    /// runtime must be running) and the instrumented router is returned
    /// unchanged.
    pub fn instrument(&self, router: Router) -> Router {
        let router = router.layer(axum::middleware::from_fn_with_state(self.clone(), track));
        match &self.inner.listen_address {
            Some(addr) => {
                exposition::spawn_exposition_server(self, addr.clone());
                router
            },
            None => router.merge(self.routes()),
        }
    }

    /// The exposition routes (metrics path, optional basic auth), for mounting
    /// on an arbitrary router.
    pub fn routes(&self) -> Router {
        exposition::routes(self)
    }

    /// Serve the exposition routes on their own listener, returning the bound
    /// address. Runs until the process exits.
    pub async fn serve_exposition(&self, addr: &str) -> std::io::Result<std::net::SocketAddr> {
        exposition::serve(self, addr).await
    }

    /// Start the push-gateway relay. The returned handle stops it; the relay
    /// otherwise runs for the remaining process lifetime.
    pub fn start_push(&self, config: PushGatewayConfig) -> Result<PushHandle, Error> {
        push::start(config)
    }

    /// Record one completed request into the standard collectors.
    pub(crate) fn record(&self, obs: &RequestObservation) {
        let inner = &self.inner;
        let handles = &inner.collectors.handles;

        let mut dur_labels: HashMap<&str, &str> = HashMap::from([
            ("code", obs.code.as_str()),
            ("method", obs.method.as_str()),
            ("url", obs.url.as_str()),
        ]);
        for (k, v) in &inner.custom_labels {
            dur_labels.insert(k.as_str(), v.as_str());
        }
        match handles.req_dur.get_metric_with(&dur_labels) {
            Ok(h) => h.observe(obs.elapsed),
            Err(err) => {
                error!(%err, "duration labels do not match the registered label set");
                debug_assert!(false, "duration label arity mismatch: {err}");
            },
        }

        let mut cnt_labels: HashMap<&str, &str> = HashMap::from([
            ("code", obs.code.as_str()),
            ("method", obs.method.as_str()),
            ("handler", obs.handler.as_str()),
            ("host", obs.host.as_str()),
            ("url", obs.url.as_str()),
        ]);
        for (k, v) in &inner.custom_labels {
            cnt_labels.insert(k.as_str(), v.as_str());
        }
        match handles.req_cnt.get_metric_with(&cnt_labels) {
            Ok(c) => c.inc(),
            Err(err) => {
                error!(%err, "counter labels do not match the registered label set");
                debug_assert!(false, "counter label arity mismatch: {err}");
            },
        }

        handles.req_sz.observe(obs.request_size as f64);
        handles.res_sz.observe(obs.response_size as f64);
    }
}
