//! Push-gateway relay: periodically fetches the local exposition text and
//! forwards it to a Prometheus push gateway.

use std::time::Duration;

use bytes::Bytes;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::Error;

/// Job segment used when [`PushGatewayConfig::job`] is empty.
const DEFAULT_JOB: &str = "promgate";

/// Where and how often to relay metrics.
#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    /// Base URL of the push gateway, e.g. `http://localhost:9091`.
    pub push_gateway_url: String,
    /// URL of the local exposition endpoint to fetch each tick, e.g.
    /// `http://127.0.0.1:8080/metrics`.
    pub metrics_url: String,
    /// Interval between pushes. Must be non-zero; a cycle slower than the
    /// interval skips ticks instead of piling up.
    pub interval: Duration,
    /// Job segment of the push URL.
    pub job: String,
    /// Timeout applied to both the fetch and the push request.
    pub timeout: Duration,
}

impl Default for PushGatewayConfig {
    fn default() -> Self {
        Self {
            push_gateway_url: String::new(),
            metrics_url: String::new(),
            interval: Duration::from_secs(5),
            job: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to a running relay task.
///
/// Dropping the handle leaves the relay running for the process lifetime;
/// call [`stop`](Self::stop) to shut it down.
pub struct PushHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Stop the relay and wait for the task to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }

    /// Token cancelling the relay, for wiring into application shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub(crate) fn start(config: PushGatewayConfig) -> Result<PushHandle, Error> {
    if config.interval.is_zero() {
        return Err(Error::InvalidPushInterval);
    }
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(Error::RelayClient)?;
    let token = CancellationToken::new();
    let task = tokio::spawn(run(config, client, token.clone()));
    Ok(PushHandle { token, task })
}

async fn run(config: PushGatewayConfig, client: reqwest::Client, token: CancellationToken) {
    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the first push happens one full
    // interval after start.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("push relay stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        // A failed fetch short-circuits the cycle; nothing is sent until the
        // next tick.
        let Some(body) = fetch(&client, &config.metrics_url).await else {
            continue;
        };
        send(&client, &config, body).await;
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Option<Bytes> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            error!(%err, url, "failed to fetch local exposition");
            return None;
        },
    };
    match response.bytes().await {
        Ok(body) => Some(body),
        Err(err) => {
            error!(%err, url, "failed to read local exposition body");
            None
        },
    }
}

async fn send(client: &reqwest::Client, config: &PushGatewayConfig, body: Bytes) {
    let url = push_url(config);
    if let Err(err) = client.post(&url).body(body).send().await {
        error!(%err, %url, "failed to push metrics to gateway");
    }
}

/// `{base}/metrics/job/{job}/instance/{hostname}`, hostname resolved per call
/// so a changed hostname is picked up on the next tick.
fn push_url(config: &PushGatewayConfig) -> String {
    let job = if config.job.is_empty() {
        DEFAULT_JOB
    } else {
        &config.job
    };
    let host = match hostname::get() {
        Ok(host) => host.to_string_lossy().into_owned(),
        Err(err) => {
            error!(%err, "failed to resolve hostname");
            String::from("unknown")
        },
    };
    format!(
        "{}/metrics/job/{}/instance/{}",
        config.push_gateway_url.trim_end_matches('/'),
        job,
        host
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_defaults_job_and_trims_trailing_slash() {
        let config = PushGatewayConfig {
            push_gateway_url: "http://localhost:9091/".to_owned(),
            ..PushGatewayConfig::default()
        };
        let url = push_url(&config);
        assert!(url.starts_with("http://localhost:9091/metrics/job/promgate/instance/"));
    }

    #[test]
    fn push_url_uses_configured_job() {
        let config = PushGatewayConfig {
            push_gateway_url: "http://gw".to_owned(),
            job: "api".to_owned(),
            ..PushGatewayConfig::default()
        };
        assert!(push_url(&config).starts_with("http://gw/metrics/job/api/instance/"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = PushGatewayConfig {
            interval: Duration::ZERO,
            ..PushGatewayConfig::default()
        };
        assert!(matches!(start(config), Err(Error::InvalidPushInterval)));
    }
}
