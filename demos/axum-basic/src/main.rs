//! Minimal promgate wiring: a hello-world app with instrumented routes and,
//! optionally, a push-gateway relay.
//!
//! ```sh
//! cargo run --bin axum-basic
//! cargo run --bin axum-basic -- --push-gateway http://localhost:9091
//! curl localhost:29090/metrics
//! ```

use std::{collections::BTreeMap, time::Duration};

use axum::{Json, Router, routing::get};
use clap::Parser;
use promgate::{Config, Prometheus, PushGatewayConfig};
use tracing::info;

#[derive(Parser)]
struct Args {
    /// Address the app (and its /metrics endpoint) listens on.
    #[arg(long, default_value = "127.0.0.1:29090")]
    listen: String,

    /// Push gateway base URL; enables the relay when set.
    #[arg(long)]
    push_gateway: Option<String>,

    /// Seconds between pushes.
    #[arg(long, default_value_t = 5)]
    push_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let prom = Prometheus::new(Config {
        subsystem: "demo".to_owned(),
        custom_labels: BTreeMap::from([("custom_label".to_owned(), "custom_value".to_owned())]),
        ..Config::default()
    })?;

    let app = prom.instrument(
        Router::new().route("/", get(|| async { Json(serde_json::json!("Hello world!")) })),
    );

    // Keep the handle alive for the process lifetime; call stop() on it to
    // shut the relay down early.
    let _push = match &args.push_gateway {
        Some(gateway) => Some(prom.start_push(PushGatewayConfig {
            push_gateway_url: gateway.clone(),
            metrics_url: format!("http://{}{}", args.listen, prom.metrics_path()),
            interval: Duration::from_secs(args.push_interval_secs),
            job: "axum-basic-demo".to_owned(),
            ..PushGatewayConfig::default()
        })?),
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "demo app listening");
    axum::serve(listener, app).await?;
    Ok(())
}
