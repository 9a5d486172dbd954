//! Registry adapter: turns metric definitions into live, registered collectors.

use std::collections::HashMap;

use prometheus::{Histogram, HistogramVec, IntCounterVec, Registry};
use tracing::error;

use crate::{
    error::Error,
    metric::{self, Collector, MetricDefinition},
};

/// Typed handles for the four standard metrics the middleware records into.
#[derive(Debug)]
pub(crate) struct Handles {
    pub req_cnt: IntCounterVec,
    pub req_dur: HistogramVec,
    pub req_sz: Histogram,
    pub res_sz: Histogram,
}

/// All collectors built from the configured definitions, registered against
/// one registry instance.
#[derive(Debug)]
pub(crate) struct Collectors {
    pub handles: Handles,
    pub by_id: HashMap<String, Collector>,
}

impl Collectors {
    /// Build and register one collector per definition.
    ///
    /// A definition that fails to build, or a name the registry rejects as a
    /// duplicate, is logged and skipped; the remaining definitions still
    /// register. A rejected collector keeps its handle, so observations still
    /// accumulate locally even though the registry will not export them.
    pub(crate) fn register(
        registry: &Registry,
        subsystem: &str,
        defs: &[MetricDefinition],
    ) -> Result<Self, Error> {
        let mut by_id = HashMap::new();
        for def in defs {
            let collector = match def.build(subsystem) {
                Ok(collector) => collector,
                Err(err) => {
                    error!(id = %def.id, name = %def.name, %err, "could not build metric collector");
                    continue;
                },
            };
            if let Err(err) = registry.register(collector.boxed()) {
                error!(name = %def.name, %err, "metric could not be registered");
            }
            by_id.insert(def.id.clone(), collector);
        }

        let handles = Handles {
            req_cnt: counter_vec(&by_id, metric::REQ_CNT_ID)?,
            req_dur: histogram_vec(&by_id, metric::REQ_DUR_ID)?,
            req_sz: histogram(&by_id, metric::REQ_SZ_ID)?,
            res_sz: histogram(&by_id, metric::RES_SZ_ID)?,
        };
        Ok(Self { handles, by_id })
    }
}

fn counter_vec(by_id: &HashMap<String, Collector>, id: &'static str) -> Result<IntCounterVec, Error> {
    match by_id.get(id) {
        Some(Collector::CounterVec(c)) => Ok(c.clone()),
        _ => Err(Error::StandardCollectorMissing { id }),
    }
}

fn histogram_vec(by_id: &HashMap<String, Collector>, id: &'static str) -> Result<HistogramVec, Error> {
    match by_id.get(id) {
        Some(Collector::HistogramVec(h)) => Ok(h.clone()),
        _ => Err(Error::StandardCollectorMissing { id }),
    }
}

fn histogram(by_id: &HashMap<String, Collector>, id: &'static str) -> Result<Histogram, Error> {
    match by_id.get(id) {
        Some(Collector::Histogram(h)) => Ok(h.clone()),
        _ => Err(Error::StandardCollectorMissing { id }),
    }
}
